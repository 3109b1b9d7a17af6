//! `helmsman config` — Configuration management commands.

use helmsman_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = advisories(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Model:        {}", config.model.name);
            println!(
                "   Turns:        {} x {} cycles",
                config.run.max_turns,
                1 + config.run.max_continuations
            );
            println!(
                "   Dispatch:     {} (max {} in flight)",
                if config.dispatch.parallel { "parallel" } else { "sequential" },
                config.dispatch.max_parallel
            );
            println!("   Confirm:      {}", config.policy.confirm_tools.join(", "));
            println!("   Denied:       {}", config.policy.denied_tools.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that are valid but probably not what the user meant.
fn advisories(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.run.max_compaction_attempts == 0 {
        warnings.push("run.max_compaction_attempts = 0: every context overflow fails the run".to_string());
    }

    if config.approval.execution_timeout_secs < config.dispatch.default_timeout_secs {
        warnings.push("approval.execution_timeout_secs is shorter than dispatch.default_timeout_secs".to_string());
    }

    for tool in &config.policy.confirm_tools {
        if config.policy.denied_tools.contains(tool) {
            warnings.push(format!("'{tool}' is both denied and confirm-gated; it will always be denied"));
        }
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", config.to_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
