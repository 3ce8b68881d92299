//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by listing runs on the server, so
//! users can type short, unambiguous prefixes.

use anyhow::{Context, Result, anyhow};
use keel_client::KeelClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if:
/// - No run matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_run_id(client: &KeelClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    // If it's already a full UUID, return it
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs(None)
        .await
        .context("Failed to fetch runs for ID resolution")?;

    let prefix = id_or_prefix.to_string();
    pick_unique(runs.iter().map(|r| r.id), &prefix)
}

fn pick_unique(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_unique() {
        let a = Uuid::parse_str("3f2a0000-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("3f2b0000-0000-4000-8000-000000000002").unwrap();

        assert_eq!(pick_unique([a, b].into_iter(), "3f2a").unwrap(), a);
        assert!(pick_unique([a, b].into_iter(), "3f2").is_err());
        assert!(pick_unique([a, b].into_iter(), "ff").is_err());
    }
}
