use anyhow::Result;
use clap::Parser;
use console::style;
use mcp_host::{McpHost, SseConnector};
use std::io::{self, Read};
use tracing::info;

mod cli;
mod logging;
mod session;

use cli::{Cli, Command};
use logging::setup_logging;

async fn print_tools(host: &McpHost) {
    let tools = host.list_tools().await;
    if tools.is_empty() {
        println!("No tools available");
        return;
    }
    for tool in tools {
        println!(
            "{} {}",
            style(&tool.name).green().bold(),
            style(format!("[{}]", tool.server)).dim()
        );
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug)?;

    let config = cli.host_config()?;
    let mut host = McpHost::new(config, Box::new(SseConnector))?;

    let connected = host.connect().await?;
    for (target, ok) in host.servers().zip(&connected) {
        if !*ok {
            eprintln!("{} could not connect to {}", style("Warning:").yellow(), target);
        }
    }
    info!(
        connected = connected.iter().filter(|ok| **ok).count(),
        configured = connected.len(),
        "Host ready"
    );

    let params = cli.sampling_params();
    let outcome = match cli.command {
        Command::Tools => {
            print_tools(&host).await;
            Ok(())
        }
        Command::Run { text, stream } => {
            let query = match text {
                Some(text) => text,
                None => {
                    let mut stdin = String::new();
                    io::stdin().read_to_string(&mut stdin)?;
                    stdin
                }
            };
            session::answer(&mut host, query.trim(), &params, stream).await
        }
        Command::Session { stream } => session::run(&mut host, &params, stream).await,
    };

    host.cleanup().await;
    outcome
}
