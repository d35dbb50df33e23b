pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use config::{Cli, DestConfig, MirrorConfig, SourceConfig};
pub use core::{MirrorEngine, RunReport};
pub use storage::{ObjectStore, SourceTree, StorageError};
