//! `runwright config` — Configuration management commands.

use std::path::Path;

use anyhow::Context;
use runwright_agent::ToolUseBehavior;
use runwright_config::EngineConfig;

fn load(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match load(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    ToolUseBehavior::from_config(&config.tool_use_behavior)
        .context("tool_use_behavior is not usable")?;

    let mut warnings = Vec::new();
    if config.max_turns > 100 {
        warnings.push("max_turns above 100 lets a looping model run for a long time");
    }
    if config.tools.default_timeout_secs.is_none() {
        warnings.push("No default tool timeout; tools without their own may hang a turn");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Max turns:      {}", config.max_turns);
    println!("   Parallel tools: {}", config.parallel_tool_calls);
    println!("   Tool use:       {:?}", config.tool_use_behavior);
    println!("   Log level:      {}", config.logging.level);
    Ok(())
}

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load(path).context("Failed to load config")?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", EngineConfig::config_path().display());
}
