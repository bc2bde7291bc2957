//! Remote backend abstraction for notesync.
//!
//! Every backend (WebDAV server, SFTP server, Google Drive, a local folder or
//! an in-memory test double) implements [`BackendClient`]. The sync engine
//! only ever talks to that trait; backends are resolved from
//! [`BackendSettings`] through a [`BackendRegistry`].

pub mod gdrive;
pub mod http;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod sftp;
pub mod webdav;

pub use local::LocalBackend;
pub use memory::{FailureKind, FaultScope, MemoryBackend};
pub use provider::{BackendClient, RemoteEntry};
pub use registry::{
    create_default_registry, BackendFactory, BackendKind, BackendRegistry, BackendSettings,
};
