use ied_core::pkg::RegistryClient;
use ied_core::Config;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing::debug;

/// Ping result for JSON output.
#[derive(Serialize)]
struct PingResult<'a> {
    ok: bool,
    registry: &'a str,
    response: serde_json::Value,
}

/// Run the ping command.
///
/// Hits the registry's ping endpoint and prints the outcome as JSON.
pub fn run(config: &Config) -> Result<()> {
    let client = RegistryClient::new(&config.registry).into_diagnostic()?;
    debug!(registry = %client.base_url(), "pinging");

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let response = runtime
        .block_on(async { client.ping().await })
        .into_diagnostic()?;

    let result = PingResult {
        ok: true,
        registry: &config.registry,
        response,
    };
    println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    Ok(())
}
