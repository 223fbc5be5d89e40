//! figi: layered configuration aggregation
//!
//! Merges defaults, config files, remote sources, environment variables, and
//! runtime overrides into one live table, in that priority order. Files can be
//! watched and remote sources polled; readers always see a complete table.

pub mod alias;
pub mod cli;
pub mod coerce;
mod engine;
pub mod env;
pub mod error;
pub mod figi;
pub mod files;
pub mod parser;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod tree;
pub mod watch;

pub use engine::ChangeCallback;
pub use error::{ErrorKind, FigiError, Result};
pub use figi::{Figi, FigiBuilder};
pub use parser::{ConfigParser, DefaultParser, Format};
pub use remote::RemoteLoader;
pub use snapshot::Snapshot;
pub use store::SourceTag;
pub use watch::{ChangeNotifier, ChangeSet, NotifyNotifier, WatcherConfig};
