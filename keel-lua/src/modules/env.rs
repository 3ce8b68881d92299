//! `env` module: read access to the step environment
//!
//! Actions see exactly the variables their step would see as a command, so
//! a secret is visible only when the step's overlay granted it.

use crate::module::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::sync::Arc;

/// Source of the variables exposed to a script
pub trait VarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// Every variable name, in a stable order
    fn keys(&self) -> Vec<String>;
}

pub struct EnvModule<V: VarProvider> {
    provider: Arc<V>,
}

impl<V: VarProvider> EnvModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: VarProvider + 'static> KeelModule for EnvModule<V> {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let env_table = lua.create_table()?;

        // env.get(name, default?)
        let provider = self.provider.clone();
        env_table.set(
            "get",
            lua.create_function(move |_, (name, default): (String, Option<String>)| {
                Ok(provider.get(&name).or(default))
            })?,
        )?;

        let provider = self.provider.clone();
        env_table.set(
            "require",
            lua.create_function(move |_, name: String| {
                provider.get(&name).ok_or_else(|| {
                    LuaError::RuntimeError(format!(
                        "Required environment variable '{}' is not set",
                        name
                    ))
                })
            })?,
        )?;

        let provider = self.provider.clone();
        env_table.set(
            "has",
            lua.create_function(move |_, name: String| Ok(provider.get(&name).is_some()))?,
        )?;

        let provider = self.provider.clone();
        env_table.set(
            "all",
            lua.create_function(move |lua, ()| {
                let table = lua.create_table()?;
                for key in provider.keys() {
                    if let Some(value) = provider.get(&key) {
                        table.set(key, value)?;
                    }
                }
                Ok(table)
            })?,
        )?;

        let provider = self.provider.clone();
        env_table.set(
            "keys",
            lua.create_function(move |lua, ()| lua.create_sequence_from(provider.keys()))?,
        )?;

        lua.globals().set(self.id(), env_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Environment of the current step
---Holds pipeline, job and step variables plus the KEEL_* context variables
---@class env
env = {}

---Get a variable, falling back to `default` when it is not set
---@param name string
---@param default? string
---@return string?
---
---@usage
---local image = env.get("IMAGE", "ubi8")
function env.get(name, default) end

---Get a variable, raising an error when it is not set
---@param name string
---@return string
function env.require(name) end

---@param name string
---@return boolean
function env.has(name) end

---All variables as a name to value table
---@return table<string, string>
function env.all() end

---All variable names
---@return string[]
function env.keys() end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Step environment access for actions",
        }
    }
}
