use anyhow::{Result, bail};
use mlua::prelude::*;

/// A set of globals exposed to action scripts.
///
/// Each module owns one global table named after its [`id`](KeelModule::id).
///
/// # Example
///
/// ```rust
/// use keel_lua::KeelModule;
/// use mlua::prelude::*;
///
/// struct Greeting;
///
/// impl KeelModule for Greeting {
///     fn id(&self) -> &'static str {
///         "greeting"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("text", "hello")?;
///         lua.globals().set(self.id(), table)
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\n---@class greeting\ngreeting = {}\n".to_string()
///     }
/// }
/// ```
pub trait KeelModule: Send + Sync {
    /// Global name of the module inside Lua
    ///
    /// Must be a valid Lua identifier and unique within a registry.
    fn id(&self) -> &'static str;

    /// Installs the module's table into `lua`'s globals
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// LuaLS annotations describing the module, starting with `---@meta`
    fn stubs(&self) -> String;

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "0.1.0",
            description: "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub id: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

/// Ordered collection of modules loaded into an action sandbox
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn KeelModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module, rejecting a second module with the same id
    pub fn register<M: KeelModule + 'static>(&mut self, module: M) -> Result<()> {
        let id = module.id();
        if self.get(id).is_some() {
            bail!("Module '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register)
    pub fn with<M: KeelModule + 'static>(mut self, module: M) -> Result<Self> {
        self.register(module)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&dyn KeelModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    pub fn modules(&self) -> &[Box<dyn KeelModule>] {
        &self.modules
    }

    /// Installs every module, stopping at the first failure
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        self.modules.iter().try_for_each(|module| module.register(lua))
    }

    /// Concatenated stubs of all modules, suitable for a single `.lua` file
    pub fn generate_stubs(&self) -> String {
        self.modules
            .iter()
            .map(|module| module.stubs())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer;

    impl KeelModule for Answer {
        fn id(&self) -> &'static str {
            "answer"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)
        }

        fn stubs(&self) -> String {
            "---@meta\n---@class answer\nanswer = {}".to_string()
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::new().with(Answer).unwrap();

        assert!(registry.get("answer").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.modules().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register(Answer).unwrap();

        let err = registry.register(Answer).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_register_all() {
        let registry = ModuleRegistry::new().with(Answer).unwrap();
        let lua = Lua::new();
        registry.register_all(&lua).unwrap();

        let value: i32 = lua.load("return answer.value").eval().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_stub_generation() {
        let registry = ModuleRegistry::new().with(Answer).unwrap();

        let stubs = registry.generate_stubs();
        assert!(stubs.starts_with("---@meta"));
        assert!(stubs.contains("answer = {}"));
    }
}
