//! Notesync sync engine
//!
//! This crate keeps a local note store consistent with a remote backend:
//! - Engine with a connectivity state machine and background retry loop
//! - Reconciliation pass with last-writer-wins and tombstone propagation
//! - Write-path tasks for uploads and image removal
//! - JSON wire format and remote directory layout
//! - Request scheduler with manual and periodic modes

pub mod config;
pub mod conflict;
pub mod engine;
pub mod layout;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod tasks;
pub mod tester;
pub mod wire;

// Re-export main types
pub use config::EngineConfig;
pub use conflict::{last_writer_wins, Decision, Resolution};
pub use engine::Engine;
pub use layout::RemoteLayout;
pub use reconciler::{FailedItem, ItemFailure, Reconciler, SyncOutcome};
pub use retry::{Backoff, RetryConfig, RetryExecutor};
pub use scheduler::{SchedulerMode, SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use service::NoteSync;
pub use state::{EngineSnapshot, EngineStatus, StatusKind, TestResult};
pub use store::{DirImageStore, ImageStore, MemoryImageStore, MemoryNoteStore, NoteStore};
pub use tasks::{RemoveImagesTask, UploadTask};
pub use wire::{decode_note, encode_note, WireNote};
