//! Config file discovery and loading.
//!
//! Discovery probes `<dir>/<name>.<ext>` for every search directory in
//! registration order and every extension in [`Format::EXTENSIONS`] order.
//! Every match is loaded; later matches override earlier ones.

use crate::error::{FigiError, Result};
use crate::parser::{ConfigParser, Format};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Search directories plus the base file name to look for.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    /// Directories searched, in registration order
    pub paths: Vec<PathBuf>,
    /// Base file name without extension
    pub name: Option<String>,
}

impl FileSearch {
    /// Add a search directory. Duplicates are ignored.
    pub fn add_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.paths.contains(&dir) {
            self.paths.push(dir);
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Every candidate path, in probe order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let Some(ref name) = self.name else {
            return Vec::new();
        };
        self.paths
            .iter()
            .flat_map(|dir| {
                Format::EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{name}.{ext}")))
            })
            .collect()
    }

    /// Candidates that exist on disk, in probe order.
    pub fn discover(&self) -> Vec<PathBuf> {
        self.candidates()
            .into_iter()
            .filter(|path| {
                let found = path.is_file();
                if found {
                    debug!("Discovered config file: {}", path.display());
                }
                found
            })
            .collect()
    }
}

/// Read and parse a config file into a raw (not yet normalized) tree.
///
/// Fails with `UnsupportedFormat` for unknown extensions, `FileNotFound` when
/// the file cannot be read, and `Parse` when the parser rejects it or the
/// document is not a mapping.
pub fn read_file(path: &Path, parser: &dyn ConfigParser) -> Result<Value> {
    let format = Format::from_path(path).ok_or_else(|| FigiError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| FigiError::file_not_found(path, Some(e)))?;
    let origin = path.display().to_string();
    let tree = parser
        .parse(format, &content)
        .map_err(|e| FigiError::parse(origin.clone(), e))?;
    match tree {
        Value::Object(_) => Ok(tree),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Err(FigiError::parse(
            origin,
            format!("top-level value must be a mapping, got {}", crate::tree::describe(&other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parser::DefaultParser;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_candidates_order() {
        let mut search = FileSearch::default();
        search.add_path("/etc/app");
        search.add_path("./conf");
        search.add_path("/etc/app");
        search.set_name("app");

        let candidates: Vec<String> = search
            .candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(
            candidates,
            vec![
                "/etc/app/app.json",
                "/etc/app/app.yml",
                "/etc/app/app.yaml",
                "/etc/app/app.toml",
                "./conf/app.json",
                "./conf/app.yml",
                "./conf/app.yaml",
                "./conf/app.toml",
            ]
        );
    }

    #[test]
    fn test_no_name_no_candidates() {
        let mut search = FileSearch::default();
        search.add_path("/etc/app");
        assert!(search.candidates().is_empty());
    }

    #[test]
    fn test_discover_only_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.yaml"), "a: 1\n").unwrap();
        std::fs::write(temp.path().join("app.json"), "{}").unwrap();

        let mut search = FileSearch::default();
        search.add_path(temp.path());
        search.set_name("app");

        let found = search.discover();
        assert_eq!(
            found,
            vec![temp.path().join("app.json"), temp.path().join("app.yaml")]
        );
    }

    #[test]
    fn test_read_file_errors() {
        let temp = TempDir::new().unwrap();

        let missing = read_file(&temp.path().join("nope.yaml"), &DefaultParser).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::FileNotFound);

        let ini = temp.path().join("app.ini");
        std::fs::write(&ini, "a=1").unwrap();
        let unsupported = read_file(&ini, &DefaultParser).unwrap_err();
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedFormat);

        let broken = temp.path().join("app.json");
        std::fs::write(&broken, "{oops").unwrap();
        let parse = read_file(&broken, &DefaultParser).unwrap_err();
        assert_eq!(parse.kind(), ErrorKind::ParseError);

        let list = temp.path().join("list.yaml");
        std::fs::write(&list, "- a\n- b\n").unwrap();
        assert_eq!(
            read_file(&list, &DefaultParser).unwrap_err().kind(),
            ErrorKind::ParseError
        );
    }

    #[test]
    fn test_read_file_ok() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.toml");
        std::fs::write(&path, "[db]\nhost = \"x\"\n").unwrap();
        assert_eq!(
            read_file(&path, &DefaultParser).unwrap(),
            json!({"db": {"host": "x"}})
        );
    }
}
