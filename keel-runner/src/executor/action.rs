//! Lua actions

use async_trait::async_trait;
use keel_core::domain::pipeline::ActionRef;
use keel_lua::sandbox::{create_action_sandbox, install_interrupt, is_interrupt};
use mlua::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

use super::{ActionRunner, ExitCode};
use crate::context::StepContext;
use crate::lua::action_registry;

/// A named action from the catalog, run in a fresh sandbox
///
/// The script's return value decides the exit code: an integer is used as
/// is, `false` is 1, anything else is 0. An uncaught Lua error is 1, and so
/// is an integer that does not fit an exit code.
pub struct LuaAction {
    action: ActionRef,
    source: Arc<str>,
    inputs: BTreeMap<String, String>,
}

impl LuaAction {
    pub fn new(action: ActionRef, source: Arc<str>, inputs: BTreeMap<String, String>) -> Self {
        Self {
            action,
            source,
            inputs,
        }
    }

    fn execute(&self, ctx: &StepContext) -> ExitCode {
        let registry = match action_registry(ctx, self.inputs.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                ctx.log.error(format!("Failed to prepare action: {:#}", e));
                return ExitCode::Code(1);
            }
        };

        let lua = match create_action_sandbox(&registry) {
            Ok(lua) => lua,
            Err(e) => {
                ctx.log.error(format!("Failed to create action sandbox: {}", e));
                return ExitCode::Code(1);
            }
        };

        let cancel = ctx.cancel.clone();
        install_interrupt(&lua, move || cancel.is_cancelled());

        let result = lua
            .load(&*self.source)
            .set_name(self.action.to_string())
            .eval::<Value>();

        match result {
            Ok(Value::Integer(code)) => ExitCode::Code(returned_code(code)),
            Ok(Value::Number(code)) if code.fract() == 0.0 => {
                ExitCode::Code(returned_code(code as i64))
            }
            Ok(Value::Boolean(false)) => ExitCode::Code(1),
            Ok(_) => ExitCode::SUCCESS,
            Err(_) if ctx.cancel.is_cancelled() => ExitCode::Interrupted,
            Err(e) if is_interrupt(&e) => ExitCode::Interrupted,
            Err(e) => {
                ctx.log
                    .error(format!("Action '{}' failed: {}", self.action, e));
                ExitCode::Code(1)
            }
        }
    }
}

fn returned_code(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(1)
}

#[async_trait]
impl ActionRunner for LuaAction {
    fn describe(&self) -> String {
        format!("action {}", self.action)
    }

    async fn run(&self, ctx: &StepContext) -> ExitCode {
        let action = LuaAction::new(self.action.clone(), self.source.clone(), self.inputs.clone());
        let task_ctx = ctx.clone();

        // The VM and any programs it starts block; keep them off the runtime
        match tokio::task::spawn_blocking(move || action.execute(&task_ctx)).await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Action '{}' panicked: {}", self.action, e);
                ctx.log.error(format!("Action '{}' crashed", self.action));
                ExitCode::Code(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::Harness;
    use std::time::Duration;

    async fn run(harness: &Harness, source: &str, inputs: &[(&str, &str)]) -> ExitCode {
        let inputs = inputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LuaAction::new("test@v1".parse().unwrap(), Arc::from(source), inputs)
            .run(&harness.ctx)
            .await
    }

    #[tokio::test]
    async fn test_return_values_map_to_exit_codes() {
        let harness = Harness::new(&[]);
        assert_eq!(run(&harness, "return 0", &[]).await, ExitCode::SUCCESS);
        assert_eq!(run(&harness, "return 7", &[]).await, ExitCode::Code(7));
        assert_eq!(run(&harness, "return false", &[]).await, ExitCode::Code(1));
        assert_eq!(run(&harness, "local x = 1", &[]).await, ExitCode::SUCCESS);
        assert_eq!(run(&harness, "return 3.0", &[]).await, ExitCode::Code(3));
    }

    #[tokio::test]
    async fn test_out_of_range_return_fails_step() {
        let harness = Harness::new(&[]);
        assert_eq!(run(&harness, "return 4294967296", &[]).await, ExitCode::Code(1));
        assert_eq!(run(&harness, "return 2^40", &[]).await, ExitCode::Code(1));
        assert_eq!(run(&harness, "return 1e300", &[]).await, ExitCode::Code(1));
    }

    #[tokio::test]
    async fn test_lua_error_fails_step() {
        let harness = Harness::new(&[]);
        let exit = run(&harness, r#"error("registry unreachable")"#, &[]).await;
        assert_eq!(exit, ExitCode::Code(1));
        assert!(harness.messages()[0].contains("registry unreachable"));
    }

    #[tokio::test]
    async fn test_modules_available() {
        let harness = Harness::new(&[("IMAGE", "ubi8")]);
        let exit = run(
            &harness,
            r#"
            log.info(env.require("IMAGE") .. ":" .. inputs.require("tag"))
            local r = process.run({ cmd = "sh", args = { "-c", "exit 0" } })
            return r.exit_code
            "#,
            &[("tag", "v1")],
        )
        .await;
        assert_eq!(exit, ExitCode::SUCCESS);
        assert_eq!(harness.messages(), vec!["ubi8:v1"]);
    }

    #[tokio::test]
    async fn test_sandbox_has_no_os() {
        let harness = Harness::new(&[]);
        let exit = run(&harness, r#"os.execute("true")"#, &[]).await;
        assert_eq!(exit, ExitCode::Code(1));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_busy_loop() {
        let harness = Harness::new(&[]);
        let cancel = harness.ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let exit = run(&harness, "while true do end", &[]).await;
        assert_eq!(exit, ExitCode::Interrupted);
    }

    #[tokio::test]
    async fn test_log_output_redacted() {
        let mut harness = Harness::new(&[]);
        harness.ctx.log = harness
            .ctx
            .log
            .with_redactor(Arc::new(crate::secrets::Redactor::new(["tok-12345"])));

        run(&harness, r#"log.info("token is " .. inputs.get("t"))"#, &[("t", "tok-12345")]).await;
        assert_eq!(harness.messages(), vec!["token is [REDACTED]"]);
    }
}
