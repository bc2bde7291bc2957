//! Backend registry and user-facing backend settings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::provider::BackendClient;
use notesync_common::{Error, Result, Secret};

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BackendClient>> + Send + Sync>;

/// Kind of remote backend selected in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Webdav,
    Sftp,
    Gdrive,
    Local,
    Memory,
}

impl BackendKind {
    /// Registry name of this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Webdav => "webdav",
            BackendKind::Sftp => "sftp",
            BackendKind::Gdrive => "gdrive",
            BackendKind::Local => "local",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend selection and credentials, as stored by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub backend: BackendKind,
    /// Server URL, `host[:port]`, folder path or Drive folder id, depending
    /// on the backend.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    /// Password or token.
    #[serde(default)]
    pub secret: Secret,
    /// Backend-specific options merged into the provider config.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl BackendSettings {
    /// Settings with no credentials.
    pub fn new(backend: BackendKind, endpoint: impl Into<String>) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
            username: String::new(),
            secret: Secret::default(),
            extra: Map::new(),
        }
    }

    /// Set username and secret.
    pub fn with_credentials(mut self, username: impl Into<String>, secret: Secret) -> Self {
        self.username = username.into();
        self.secret = secret;
        self
    }

    /// Add a backend-specific option.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Build the JSON configuration handed to the registry factory.
    ///
    /// `extra` entries are applied last and win over the common keys.
    pub fn provider_config(&self) -> Value {
        let mut config = Map::new();
        config.insert("endpoint".to_string(), Value::String(self.endpoint.clone()));
        config.insert("username".to_string(), Value::String(self.username.clone()));
        config.insert(
            "secret".to_string(),
            Value::String(self.secret.expose().to_string()),
        );
        for (key, value) in &self.extra {
            config.insert(key.clone(), value.clone());
        }
        Value::Object(config)
    }
}

/// Registry for backend factories.
///
/// Allows dynamic registration and resolution of backends by name and
/// configuration.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and configuration.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BackendClient>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Backend '{}' is not registered", name)))?;
        factory(config)
    }

    /// Resolve the backend described by `settings`.
    pub fn resolve_settings(&self, settings: &BackendSettings) -> Result<Arc<dyn BackendClient>> {
        self.resolve(settings.backend.as_str(), settings.provider_config())
    }

    /// Get list of registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends())
            .finish()
    }
}

/// Create a registry with every built-in backend.
pub fn create_default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let builtins: [(BackendKind, BackendFactory); 5] = [
        (
            BackendKind::Memory,
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryBackend::new()))),
        ),
        (
            BackendKind::Local,
            Box::new(|config| {
                let root = config
                    .get("root")
                    .or_else(|| config.get("endpoint"))
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidInput("Local backend requires a root folder".to_string())
                    })?;
                Ok(Arc::new(crate::local::LocalBackend::new(root)?))
            }),
        ),
        (BackendKind::Webdav, Box::new(crate::webdav::create_webdav_backend)),
        (BackendKind::Sftp, Box::new(crate::sftp::create_sftp_backend)),
        (BackendKind::Gdrive, Box::new(crate::gdrive::create_gdrive_backend)),
    ];

    for (kind, factory) in builtins {
        // Names are distinct constants, registration into an empty map cannot collide
        if let Err(e) = registry.register(kind.as_str(), factory) {
            tracing::error!(backend = %kind, error = %e, "Failed to register backend");
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = BackendRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let backend = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BackendRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_default_registry_has_all_backends() {
        let registry = create_default_registry();
        assert_eq!(
            registry.backends(),
            vec!["gdrive", "local", "memory", "sftp", "webdav"]
        );
    }

    #[test]
    fn test_resolve_unknown_backend() {
        let registry = BackendRegistry::new();
        assert!(registry.resolve("ftp", Value::Null).err().unwrap().is_not_found());
    }

    #[test]
    fn test_provider_config_merges_extra() {
        let settings = BackendSettings::new(BackendKind::Webdav, "https://dav.example.com")
            .with_credentials("alice", Secret::new("pw"))
            .with_extra("username", Value::String("override".into()));

        let config = settings.provider_config();
        assert_eq!(config["endpoint"], "https://dav.example.com");
        assert_eq!(config["secret"], "pw");
        assert_eq!(config["username"], "override");
    }

    #[test]
    fn test_settings_serialization_keeps_kind_lowercase() {
        let settings = BackendSettings::new(BackendKind::Sftp, "host:22");
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["backend"], "sftp");

        let back: BackendSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_resolve_local_from_settings() {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = create_default_registry();
        let settings = BackendSettings::new(
            BackendKind::Local,
            temp.path().to_string_lossy().to_string(),
        );
        let backend = registry.resolve_settings(&settings).unwrap();
        assert_eq!(backend.name(), "local");
    }
}
