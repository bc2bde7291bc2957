//! Common types used throughout notesync.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// A path on the remote side, independent of the backend protocol.
///
/// Backends translate this into a URL, an SFTP path or a chain of folder IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a RemotePath.
    ///
    /// Uses '/' as separator. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "Path component cannot contain separators: {}",
                comp
            )));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(
                "Relative path components are not allowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Iterate over this path and all of its ancestors, root excluded,
    /// shortest first.
    pub fn ancestors_inclusive(&self) -> impl Iterator<Item = RemotePath> + '_ {
        (1..=self.components.len()).map(move |n| Self {
            components: self.components[..n].to_vec(),
        })
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// A password or token that zeroizes on drop and never prints.
#[derive(Clone, Default, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for handing to a protocol library.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} chars])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_remote_path_root() {
        let path = RemotePath::root();
        assert!(path.is_root());
        assert_eq!(path.to_string_path(), "/");
        assert!(RemotePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_remote_path_parse() {
        let path = RemotePath::parse("/notesync/notes/12.json").unwrap();
        assert_eq!(path.components(), &["notesync", "notes", "12.json"]);
        assert_eq!(path.to_string_path(), "/notesync/notes/12.json");
    }

    #[test]
    fn test_remote_path_join_and_parent() {
        let path = RemotePath::root().join("base").unwrap().join("images").unwrap();
        assert_eq!(path.to_string_path(), "/base/images");
        assert_eq!(path.parent().unwrap().to_string_path(), "/base");
        assert_eq!(path.name(), Some("images"));
    }

    #[test]
    fn test_remote_path_rejects_traversal() {
        assert!(RemotePath::root().join("..").is_err());
        assert!(RemotePath::root().join("a/b").is_err());
        assert!(RemotePath::parse("/a//b").is_err());
    }

    #[test]
    fn test_ancestors_inclusive() {
        let path = RemotePath::parse("/a/b/c").unwrap();
        let all: Vec<String> = path.ancestors_inclusive().map(|p| p.to_string()).collect();
        assert_eq!(all, vec!["/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(secret.expose(), "hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }

    proptest! {
        #[test]
        fn prop_parse_roundtrips_display(parts in proptest::collection::vec("[a-zA-Z0-9_.-]{1,12}", 0..6)) {
            prop_assume!(parts.iter().all(|p| p != "." && p != ".."));
            let joined = format!("/{}", parts.join("/"));
            let path = RemotePath::parse(&joined).unwrap();
            prop_assert_eq!(path.components().len(), parts.len());
            prop_assert_eq!(RemotePath::parse(&path.to_string()).unwrap(), path);
        }
    }
}
