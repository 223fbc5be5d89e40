//! CLI command definitions for figi
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod dump;

use clap::{Args, Parser, Subcommand};
use dump::DumpArgs;
use serde_json::Value;
use std::path::PathBuf;

/// Default base name for discovered config files.
pub const DEFAULT_CONFIG_NAME: &str = "config";

/// Default prefix for environment auto-binding.
pub const DEFAULT_ENV_PREFIX: &str = "FIGI";

/// Layered configuration inspector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory to search for config files (repeatable, searched in order)
    #[arg(short = 'p', long = "config-path", value_name = "DIR", global = true)]
    pub config_paths: Vec<PathBuf>,

    /// Base name of config files to discover (without extension)
    #[arg(short, long, default_value = DEFAULT_CONFIG_NAME, global = true)]
    pub name: String,

    /// Explicit config file to load after discovery (repeatable)
    #[arg(short, long = "file", value_name = "FILE", global = true)]
    pub files: Vec<PathBuf>,

    /// Environment variable prefix; empty disables auto-binding
    #[arg(long, default_value = DEFAULT_ENV_PREFIX, global = true)]
    pub env_prefix: String,

    /// Environment key separator
    #[arg(long, default_value = "_", global = true)]
    pub env_separator: String,

    /// Override a key (KEY=VALUE, repeatable). Values are coerced like env vars.
    #[arg(
        short,
        long = "set",
        value_name = "KEY=VALUE",
        value_parser = parse_override,
        global = true
    )]
    pub overrides: Vec<(String, Value)>,

    /// Skip the user config directory when discovering files
    #[arg(long, global = true)]
    pub no_user_config: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value at a dotted key
    Get(GetArgs),

    /// Print the whole merged table (default if no subcommand given)
    Dump(DumpArgs),

    /// List every leaf key in dotted form
    Keys,

    /// Watch loaded files and print the table whenever it changes
    Watch(DumpArgs),
}

/// Arguments for the get subcommand
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Dotted key, e.g. `database.host`
    pub key: String,

    /// Exit with an error when the key is not set
    #[arg(long)]
    pub required: bool,
}

/// Parse a `KEY=VALUE` override. The value is coerced the same way as
/// environment values (`true`, `42`, `1.5` become typed scalars).
pub fn parse_override(raw: &str) -> Result<(String, Value), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("Invalid override '{}'. Expected KEY=VALUE", raw));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid override '{}'. Key is empty", raw));
    }
    Ok((key.to_string(), crate::coerce::coerce_str(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("server.port=8080").unwrap(),
            ("server.port".to_string(), json!(8080))
        );
        assert_eq!(
            parse_override("flag=true").unwrap(),
            ("flag".to_string(), json!(true))
        );
        assert_eq!(
            parse_override("url=a=b").unwrap(),
            ("url".to_string(), json!("a=b"))
        );
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=1").is_err());
    }

    #[test]
    fn test_cli_parses_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "figi", "get", "database.host", "--set", "a=1", "-p", "/etc/app",
        ])
        .unwrap();
        assert_eq!(cli.config_paths, vec![PathBuf::from("/etc/app")]);
        assert_eq!(cli.overrides, vec![("a".to_string(), json!(1))]);
        assert_eq!(cli.name, DEFAULT_CONFIG_NAME);
        match cli.command {
            Some(Command::Get(args)) => assert_eq!(args.key, "database.host"),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
