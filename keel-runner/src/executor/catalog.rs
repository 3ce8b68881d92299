//! Action catalog
//!
//! Actions are Lua scripts looked up by name and version. A configured
//! directory is searched first (`<dir>/<name>/<version>.lua`, then
//! `<dir>/<name>.lua`); built-in actions fill in the rest.

use keel_core::domain::pipeline::ActionRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action '{0}' not found")]
    NotFound(String),

    #[error("Failed to read action '{action}' from {path}: {source}")]
    Unreadable {
        action: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Built-in actions as `(name, version, source)`
const BUILTIN_ACTIONS: &[(&str, &str, &str)] = &[("checkout", "v1", CHECKOUT_V1)];

const CHECKOUT_V1: &str = r#"
-- checkout@v1: fetch the triggering commit into the workspace
local repository = inputs.get("repository") or env.require("KEEL_REPOSITORY")
local url = inputs.get("url") or env.get("KEEL_CLONE_URL")
    or ("https://github.com/" .. repository .. ".git")
local ref = inputs.get("ref") or env.get("KEEL_SHA") or env.require("KEEL_REF")
local depth = inputs.get("depth", "1")
local path = inputs.get("path", ".")

log.info("Checking out " .. repository .. " at " .. ref)

local init = process.run({ cmd = "git", args = { "init", "--quiet", path } })
if init.exit_code ~= 0 then
    return init.exit_code
end

local commands = {
    { "remote", "add", "origin", url },
    { "fetch", "--quiet", "--depth", depth, "origin", ref },
    { "checkout", "--quiet", "--detach", "FETCH_HEAD" },
}

for _, args in ipairs(commands) do
    local result = process.run({ cmd = "git", args = args, cwd = path })
    if result.exit_code ~= 0 then
        log.error("git " .. args[1] .. " exited with " .. result.exit_code)
        return result.exit_code
    end
end

return 0
"#;

#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    dir: Option<PathBuf>,
}

impl ActionCatalog {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the Lua source of `action`
    pub fn resolve(&self, action: &ActionRef) -> Result<Arc<str>, ActionError> {
        if let Some(dir) = &self.dir {
            let candidates = [
                dir.join(&action.name).join(format!("{}.lua", action.version)),
                dir.join(format!("{}.lua", action.name)),
            ];
            for path in candidates {
                if path.is_file() {
                    return std::fs::read_to_string(&path)
                        .map(Arc::from)
                        .map_err(|source| ActionError::Unreadable {
                            action: action.to_string(),
                            path,
                            source,
                        });
                }
            }
        }

        BUILTIN_ACTIONS
            .iter()
            .find(|(name, version, _)| *name == action.name && *version == action.version)
            .map(|(_, _, source)| Arc::from(*source))
            .ok_or_else(|| ActionError::NotFound(action.to_string()))
    }

    /// `name@version` of every built-in action
    pub fn builtins() -> impl Iterator<Item = String> {
        BUILTIN_ACTIONS
            .iter()
            .map(|(name, version, _)| format!("{}@{}", name, version))
    }
}
