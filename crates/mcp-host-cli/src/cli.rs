use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mcp_host::{CompletionConfig, HostConfig, SamplingParams, ServerTarget};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mcp-host", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML host configuration
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Path to a YAML host configuration file"
    )]
    pub config: Option<PathBuf>,

    /// MCP servers to connect to, in addition to the configured ones
    #[arg(
        short,
        long = "server",
        global = true,
        value_name = "[NAME=]URL",
        help = "SSE endpoint of an MCP server, optionally prefixed with a name (repeatable)"
    )]
    pub servers: Vec<ServerTarget>,

    #[arg(long, global = true, value_name = "TEXT", help = "Instructions for the system prompt")]
    pub system: Option<String>,

    #[arg(long, global = true, help = "Forget the conversation after every query")]
    pub no_history: bool,

    #[arg(long, global = true, value_name = "N", help = "Maximum model calls per query")]
    pub max_rounds: Option<usize>,

    #[arg(long, global = true, value_name = "N")]
    pub max_tokens: Option<u32>,

    #[arg(long, global = true, value_name = "T")]
    pub temperature: Option<f32>,

    #[arg(long, global = true, value_name = "P")]
    pub top_p: Option<f32>,

    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List the tools of every connected server
    #[command(about = "List the tools of every connected server")]
    Tools,

    /// Answer a single query
    #[command(about = "Answer a single query from --text or stdin")]
    Run {
        #[arg(
            short = 't',
            long = "text",
            value_name = "TEXT",
            help = "Query to answer, read from stdin when omitted"
        )]
        text: Option<String>,

        #[arg(long, help = "Print the reply as it is generated")]
        stream: bool,
    },

    /// Start an interactive chat
    #[command(about = "Start an interactive chat", alias = "s")]
    Session {
        #[arg(long, help = "Print replies as they are generated")]
        stream: bool,
    },
}

impl Cli {
    /// Merges the configuration file, environment and flags. Flags win.
    pub fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => HostConfig::default(),
        };

        config.servers.extend(self.servers.iter().cloned());
        if config.servers.is_empty() {
            bail!("No MCP servers configured. Pass --server <URL> or set servers in --config");
        }

        if config.completion.is_none() {
            config.completion = CompletionConfig::from_env();
        }
        if let Some(system) = &self.system {
            config.system_prompt = system.clone();
        }
        if self.no_history {
            config.history = false;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        Ok(config)
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            temperature: self.temperature,
        }
    }
}
