//! Lua sandbox creation
//!
//! Action scripts run with only the table, string, math and coroutine
//! libraries. There is no `io`, `os`, `package` or `debug`, and the globals
//! that load code from disk are removed. Everything else an action can do is
//! granted through registered modules.

use mlua::{HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, VmState};

use crate::module::ModuleRegistry;

/// Message carried by the error raised when an interrupt fires
pub const INTERRUPTED: &str = "action interrupted";

/// Instructions executed between two interrupt checks
const INTERRUPT_INTERVAL: u32 = 1000;

/// Create a restricted Lua state with no modules registered
///
/// # Example
/// ```no_run
/// use keel_lua::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let sum: i32 = lua.load("return 1 + 2").eval()?;
/// assert_eq!(sum, 3);
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    for name in ["require", "dofile", "loadfile", "load", "collectgarbage"] {
        globals.set(name, mlua::Nil)?;
    }

    Ok(lua)
}

/// Create a sandbox with every module of `registry` installed
pub fn create_action_sandbox(registry: &ModuleRegistry) -> LuaResult<Lua> {
    let lua = create_sandbox()?;
    registry.register_all(&lua)?;
    Ok(lua)
}

/// Abort the running script as soon as `should_stop` returns true
///
/// The check runs every [`INTERRUPT_INTERVAL`] VM instructions, so a tight
/// loop is interrupted too. The raised error contains [`INTERRUPTED`].
pub fn install_interrupt<F>(lua: &Lua, should_stop: F)
where
    F: Fn() -> bool + Send + 'static,
{
    let triggers = HookTriggers::new().every_nth_instruction(INTERRUPT_INTERVAL);
    #[allow(clippy::let_unit_value)]
    let _ = lua.set_hook(triggers, move |_, _| {
        if should_stop() {
            Err(mlua::Error::RuntimeError(INTERRUPTED.to_string()))
        } else {
            Ok(VmState::Continue)
        }
    });
}

/// Whether `err` was raised by an interrupt installed with [`install_interrupt`]
pub fn is_interrupt(err: &mlua::Error) -> bool {
    err.to_string().contains(INTERRUPTED)
}
