//! SMB client: session negotiation and share access

pub mod config;
pub mod connection;
pub mod session;
pub mod tree;

pub use config::ClientConfig;
pub use session::{Session, SessionState};
pub use tree::{normalize_path, DirectoryEntry, DirectoryListing, RemoteFile, TreeHandle};
