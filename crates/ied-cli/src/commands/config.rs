use ied_core::Config;
use miette::{IntoDiagnostic, Result};

/// Print the effective configuration as JSON on stdout.
pub fn run(config: &Config) -> Result<()> {
    let out = serde_json::to_string_pretty(config).into_diagnostic()?;
    println!("{out}");
    Ok(())
}
