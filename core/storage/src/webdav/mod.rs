//! WebDAV backend.
//!
//! Talks plain HTTP verbs (PROPFIND, GET, PUT, DELETE, MKCOL) to a WebDAV
//! server such as Nextcloud, ownCloud or Apache mod_dav, using basic auth.

pub mod multistatus;
pub mod provider;

pub use multistatus::{parse_multistatus, DavEntry};
pub use provider::{create_webdav_backend, WebDavBackend, WebDavConfig};
