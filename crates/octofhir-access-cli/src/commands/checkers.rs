use anyhow::Result;
use colored::Colorize;
use octofhir_access::{AccessConfig, CheckerRegistry};

pub fn list(config: &AccessConfig) -> Result<()> {
    let registry = CheckerRegistry::builtin(config)?;

    for name in registry.names() {
        if name == config.checker {
            println!("{} {}", "*".green(), name.green());
        } else {
            println!("  {name}");
        }
    }

    if !registry.contains(&config.checker) {
        anyhow::bail!(
            "Configured checker '{}' is not registered",
            config.checker
        );
    }
    Ok(())
}
