//! `inputs` module: the rendered `with:` map of an action step

use crate::module::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct InputModule {
    inputs: Arc<BTreeMap<String, String>>,
}

impl InputModule {
    pub fn new(inputs: BTreeMap<String, String>) -> Self {
        Self {
            inputs: Arc::new(inputs),
        }
    }
}

impl KeelModule for InputModule {
    fn id(&self) -> &'static str {
        "inputs"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let table = lua.create_table()?;

        let inputs = self.inputs.clone();
        table.set(
            "get",
            lua.create_function(move |_, (name, default): (String, Option<String>)| {
                Ok(inputs.get(&name).cloned().or(default))
            })?,
        )?;

        let inputs = self.inputs.clone();
        table.set(
            "require",
            lua.create_function(move |_, name: String| {
                inputs.get(&name).cloned().ok_or_else(|| {
                    LuaError::RuntimeError(format!("Required input '{}' was not provided", name))
                })
            })?,
        )?;

        let inputs = self.inputs.clone();
        table.set(
            "has",
            lua.create_function(move |_, name: String| Ok(inputs.contains_key(&name)))?,
        )?;

        let inputs = self.inputs.clone();
        table.set(
            "all",
            lua.create_function(move |lua, ()| {
                lua.create_table_from(inputs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            })?,
        )?;

        lua.globals().set(self.id(), table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Inputs passed to the action through the step's `with:` map
---@class inputs
inputs = {}

---@param name string
---@param default? string
---@return string?
function inputs.get(name, default) end

---Get an input, raising an error when the step did not provide it
---@param name string
---@return string
function inputs.require(name) end

---@param name string
---@return boolean
function inputs.has(name) end

---@return table<string, string>
function inputs.all() end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Action inputs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Lua {
        let lua = Lua::new();
        let inputs = BTreeMap::from([
            ("repository".to_string(), "org/app".to_string()),
            ("depth".to_string(), "1".to_string()),
        ]);
        InputModule::new(inputs).register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_inputs_get_and_require() {
        let lua = setup();

        let repo: String = lua
            .load(r#"return inputs.require("repository")"#)
            .eval()
            .unwrap();
        assert_eq!(repo, "org/app");

        let fallback: String = lua
            .load(r#"return inputs.get("ref", "main")"#)
            .eval()
            .unwrap();
        assert_eq!(fallback, "main");

        let err = lua
            .load(r#"return inputs.require("ref")"#)
            .eval::<String>()
            .unwrap_err();
        assert!(err.to_string().contains("'ref' was not provided"));
    }

    #[test]
    fn test_inputs_all() {
        let lua = setup();

        let depth: String = lua.load("return inputs.all().depth").eval().unwrap();
        assert_eq!(depth, "1");

        let has: bool = lua.load(r#"return inputs.has("depth")"#).eval().unwrap();
        assert!(has);
    }
}
