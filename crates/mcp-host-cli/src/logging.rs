use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "mcp_host=info,mcp_client=info";
const DEBUG_DIRECTIVES: &str = "mcp_host=debug,mcp_client=debug,reqwest_eventsource=debug";

/// Logs go to stderr so stdout only carries the assistant's output.
///
/// `RUST_LOG` takes precedence over both the default and the `--debug` directives.
pub fn setup_logging(debug: bool) -> Result<()> {
    let directives = if debug {
        DEBUG_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to set up logging: {}", e))
}
