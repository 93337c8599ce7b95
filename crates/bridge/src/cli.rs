//! Command-line interface.

use clap::{Parser, Subcommand};

use mb_domain::config::ToolServerConfig;
use mb_domain::error::{Error, Result};

/// mcpbridge — bridge MCP tool servers to an LLM chat service.
#[derive(Debug, Parser)]
#[command(name = "mcpbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a prompt through the bridge and print the final answer.
    Run {
        /// Prompt for the language model.
        prompt: String,
        /// Tool server definition: a single "name command path" string,
        /// e.g. -t "calc python /srv/calc_server.py". Repeatable.
        #[arg(short = 't', long = "tool")]
        tool: Vec<String>,
        /// Model override (e.g. "gpt-4o").
        #[arg(long)]
        model: Option<String>,
        /// Maximum model calls before giving up.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Override the built-in system prompt.
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Connect to the given tool servers, print the discovered catalog, exit.
    Tools {
        /// Tool server definition, same format as `run -t`. Repeatable.
        #[arg(short = 't', long = "tool", required = true)]
        tool: Vec<String>,
    },
    /// Print version information.
    Version,
}

/// Parse `"name command path..."` triples into server configs.
///
/// The first word names the server, the second is the command to spawn,
/// and everything after it becomes the argument list.
pub fn parse_tool_specs(specs: &[String]) -> Result<Vec<ToolServerConfig>> {
    let mut configs: Vec<ToolServerConfig> = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut words = spec.split_whitespace();
        let (Some(id), Some(command)) = (words.next(), words.next()) else {
            return Err(Error::Config(format!(
                "invalid tool definition '{spec}': expected \"name command path\""
            )));
        };
        let args: Vec<String> = words.map(String::from).collect();
        if args.is_empty() {
            return Err(Error::Config(format!(
                "invalid tool definition '{spec}': expected \"name command path\""
            )));
        }
        if configs.iter().any(|c| c.id == id) {
            return Err(Error::Config(format!(
                "duplicate tool server name '{id}'"
            )));
        }
        configs.push(ToolServerConfig {
            id: id.to_string(),
            command: command.to_string(),
            args,
        });
    }
    Ok(configs)
}
