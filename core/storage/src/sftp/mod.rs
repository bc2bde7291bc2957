//! SFTP backend.
//!
//! Opens an SSH connection with password authentication, starts the `sftp`
//! subsystem and keeps the session around until a transport error, after
//! which the next call reconnects.

pub mod provider;
pub mod session;

pub use provider::{create_sftp_backend, SftpBackend, SftpConfig};
pub use session::{map_sftp_error, SftpConnection};
