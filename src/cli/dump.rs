//! Dump subcommand for figi CLI
//!
//! Renders the merged table in one of the supported file formats.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

/// Arguments for the dump and watch subcommands
#[derive(Args, Debug, Default)]
pub struct DumpArgs {
    /// Output format: json (default), yaml, or toml
    #[arg(short = 'o', long, default_value = "json", value_name = "FORMAT")]
    pub format: DumpFormat,

    /// Only print the subtree at this dotted key
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,
}

/// Output format for dumped tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpFormat {
    #[default]
    Json,
    Yaml,
    Toml,
}

impl std::str::FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(DumpFormat::Json),
            "yaml" | "yml" => Ok(DumpFormat::Yaml),
            "toml" => Ok(DumpFormat::Toml),
            _ => Err(format!(
                "Invalid format '{}'. Valid options: json, yaml, toml",
                s
            )),
        }
    }
}

impl std::fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpFormat::Json => write!(f, "json"),
            DumpFormat::Yaml => write!(f, "yaml"),
            DumpFormat::Toml => write!(f, "toml"),
        }
    }
}

/// Render a value in the requested format.
pub fn render(value: &Value, format: DumpFormat) -> Result<String> {
    let text = match format {
        DumpFormat::Json => serde_json::to_string_pretty(value).context("Failed to render JSON")?,
        DumpFormat::Yaml => serde_yaml::to_string(value).context("Failed to render YAML")?,
        // TOML has no null and needs a table at the top.
        DumpFormat::Toml => toml::to_string_pretty(value).context("Failed to render TOML")?,
    };
    Ok(text.trim_end().to_string())
}
