pub mod chain;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod fs_client;
pub mod join;
pub mod manager;
pub mod remote;

pub use chain::{ChainDb, ChainView, Merged};
pub use client::{Client, UpdateOutcome};
pub use config::{BackendKind, DatabaseConfig, RunConfig};
pub use document::Document;
pub use error::{Result, StrataError};
pub use fs_client::FileSystemClient;
pub use manager::ClientManager;
pub use remote::RemoteClient;
