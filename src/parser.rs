//! Config file formats and the parser seam.
//!
//! The aggregator never interprets text itself: it hands file contents to a
//! [`ConfigParser`] and works with the resulting tree. [`DefaultParser`]
//! covers JSON, YAML, and TOML.

use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Extensions probed during discovery, in probe order.
    pub const EXTENSIONS: [&'static str; 4] = ["json", "yml", "yaml", "toml"];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yml" | "yaml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Yaml => write!(f, "yaml"),
            Format::Toml => write!(f, "toml"),
        }
    }
}

/// Turns config text into a tree.
///
/// Errors are reported as display strings; the caller wraps them into
/// [`crate::FigiError::Parse`] with the file name attached.
pub trait ConfigParser: Send + Sync {
    fn parse(&self, format: Format, content: &str) -> Result<Value, String>;
}

impl<F> ConfigParser for F
where
    F: Fn(Format, &str) -> Result<Value, String> + Send + Sync,
{
    fn parse(&self, format: Format, content: &str) -> Result<Value, String> {
        self(format, content)
    }
}

/// Parser backed by `serde_json`, `serde_yaml`, and `toml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl ConfigParser for DefaultParser {
    fn parse(&self, format: Format, content: &str) -> Result<Value, String> {
        match format {
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Format::Yaml => {
                // An empty YAML document is an empty config, not a null one.
                if content.trim().is_empty() {
                    return Ok(Value::Object(Default::default()));
                }
                serde_yaml::from_str(content).map_err(|e| e.to_string())
            }
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}
