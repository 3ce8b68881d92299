//! Pipeline Service
//!
//! Loads the pipeline definitions the server matches events against.

use anyhow::{Context, Result, bail};
use keel_core::domain::pipeline::Pipeline;
use keel_core::parse_pipeline;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Loads every `*.yml` / `*.yaml` file in `dir`, in file name order
///
/// Pipeline names must be unique across the directory.
pub fn load_pipelines(dir: &Path) -> Result<Vec<Arc<Pipeline>>> {
    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
        })
        .collect::<Vec<_>>();
    paths.sort();

    let mut names = HashSet::new();
    let mut pipelines = Vec::with_capacity(paths.len());
    for path in paths {
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let pipeline =
            parse_pipeline(&source).with_context(|| format!("Invalid pipeline {}", path.display()))?;

        if !names.insert(pipeline.name.clone()) {
            bail!(
                "Pipeline '{}' in {} is defined more than once",
                pipeline.name,
                path.display()
            );
        }

        tracing::debug!("Loaded pipeline '{}' from {}", pipeline.name, path.display());
        pipelines.push(Arc::new(pipeline));
    }

    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PIPELINE: &str = "name: {name}\non: push\njobs:\n  build:\n    steps:\n      - run: make\n";

    fn write(dir: &TempDir, file: &str, name: &str) {
        std::fs::write(dir.path().join(file), PIPELINE.replace("{name}", name)).unwrap();
    }

    #[test]
    fn test_load_pipelines() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.yaml", "second");
        write(&dir, "a.yml", "first");
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pipelines = load_pipelines(dir.path()).unwrap();
        let names: Vec<_> = pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yml", "same");
        write(&dir, "b.yml", "same");

        assert!(load_pipelines(dir.path()).is_err());
    }

    #[test]
    fn test_invalid_definition_names_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.yml"), "name: x\n").unwrap();

        let err = load_pipelines(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.yml"));
    }
}
