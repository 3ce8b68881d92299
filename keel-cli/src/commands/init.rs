//! Init command handlers
//!
//! Generates the files Lua action authors need for editor support: a
//! `.luarc.json` and LuaLS stubs for every module an action can use.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use std::fs;
use std::path::Path;

/// Init subcommands
#[derive(Subcommand)]
pub enum InitCommands {
    /// Generate Lua development files (.luarc.json and stubs)
    Lua {
        /// Output directory for generated files
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Generate only .luarc.json
        #[arg(long)]
        config_only: bool,

        /// Generate only stub files
        #[arg(long)]
        stubs_only: bool,
    },
}

pub fn handle_init_command(command: InitCommands) -> Result<()> {
    match command {
        InitCommands::Lua {
            output,
            config_only,
            stubs_only,
        } => {
            let output_path = Path::new(&output);

            if !stubs_only {
                generate_luarc_json(output_path)?;
            }
            if !config_only {
                generate_stubs(output_path)?;
            }

            println!("{}", "✓ Lua development files generated!".green().bold());
            println!();
            println!("{}", "Next steps:".bold());
            println!("  1. Install Lua Language Server in your editor");
            println!("  2. Write actions as <actions-dir>/<name>/<version>.lua");
            println!(
                "  3. Point {} at that directory",
                "KEEL_ACTIONS_DIR".cyan()
            );
            Ok(())
        }
    }
}

fn generate_luarc_json(output_path: &Path) -> Result<()> {
    let luarc_path = output_path.join(".luarc.json");

    let luarc_content = r#"{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {
    "version": "Lua 5.4"
  },
  "diagnostics": {
    "globals": ["log", "env", "inputs", "process"]
  },
  "workspace": {
    "library": [".keel/stubs"],
    "checkThirdParty": false
  },
  "completion": {
    "callSnippet": "Both"
  }
}
"#;

    fs::create_dir_all(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    fs::write(&luarc_path, luarc_content)
        .with_context(|| format!("Failed to write {}", luarc_path.display()))?;

    println!("  {} .luarc.json", "Created".green());
    Ok(())
}

/// Stubs come from the module implementations themselves
fn generate_stubs(output_path: &Path) -> Result<()> {
    let stubs_dir = output_path.join(".keel").join("stubs");
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {}", stubs_dir.display()))?;

    let stub_path = stubs_dir.join("keel.lua");
    fs::write(&stub_path, keel_runner::lua::action_stubs()?)
        .with_context(|| format!("Failed to write stub file {}", stub_path.display()))?;

    println!(
        "  {} {}",
        "Created".green(),
        stub_path.display().to_string().cyan()
    );
    Ok(())
}
