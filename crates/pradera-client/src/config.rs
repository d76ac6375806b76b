//! RON configuration for the client and the `pradera` binary.
//!
//! ```ron
//! (
//!     backend: Rest(
//!         base_url: "http://localhost:8080",
//!         token: Some("..."),
//!         timeout_ms: 10000,
//!     ),
//!     session: (
//!         debounce_ms: 300,
//!         delete_policy: delete_orphans,
//!         upload_document_state: true,
//!     ),
//!     user: (id: 3, login: Some("ana")),
//! )
//! ```
//!
//! Every field has a default, so an empty file `()` is valid.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use pradera_doc::{DeletePolicy, ReconcileOptions};
use pradera_types::{UserId, UserRef};

use crate::memory::MemoryStore;
use crate::rest::{RestConfig, RestStore};
use crate::store::{StoreError, Stores};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PRADERA_CONFIG";

/// Default debounce between the last change event and a save.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
    #[error("cannot open store: {0}")]
    Store(#[from] StoreError),
}

/// Which store the client talks to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Process-local, starts empty.
    #[default]
    Memory,
    Rest {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Per-session behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub debounce_ms: u64,
    pub delete_policy: DeletePolicy,
    /// Push the reconciled document to the flow's document state after
    /// every successful save.
    pub upload_document_state: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            delete_policy: DeletePolicy::default(),
            upload_document_state: false,
        }
    }
}

impl SessionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions::default().with_delete_policy(self.delete_policy)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PraderaConfig {
    pub backend: Backend,
    pub session: SessionConfig,
    /// Acting user; owns blocks created by sessions.
    pub user: UserRef,
}

impl Default for PraderaConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            session: SessionConfig::default(),
            user: UserRef::new(UserId::new(1)),
        }
    }
}

impl PraderaConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!("loading config from {}", path.display());
                Self::from_ron(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Resolve the config path: explicit argument, then `$PRADERA_CONFIG`.
    /// With neither, the defaults are used.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Build the configured store pair.
    pub fn open_stores(&self) -> Result<Stores, ConfigError> {
        match &self.backend {
            Backend::Memory => Ok(Stores::new(Arc::new(MemoryStore::new()))),
            Backend::Rest {
                base_url,
                token,
                timeout_ms,
            } => {
                let mut config = RestConfig::new(base_url.clone())
                    .with_timeout(Duration::from_millis(*timeout_ms));
                if let Some(token) = token {
                    config = config.with_token(token.clone());
                }
                Ok(Stores::new(Arc::new(RestStore::new(config)?)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(PraderaConfig::from_ron("()").unwrap(), PraderaConfig::default());
    }

    #[test]
    fn test_parses_rest_backend() {
        let config = PraderaConfig::from_ron(
            r#"(
                backend: Rest(base_url: "http://localhost:8080", token: Some("t")),
                session: (debounce_ms: 50, delete_policy: delete_orphans),
                user: (id: 7),
            )"#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Rest {
                base_url: "http://localhost:8080".into(),
                token: Some("t".into()),
                timeout_ms: DEFAULT_TIMEOUT_MS,
            }
        );
        assert_eq!(config.session.debounce(), Duration::from_millis(50));
        assert_eq!(config.session.delete_policy, DeletePolicy::DeleteOrphans);
        assert!(!config.session.upload_document_state);
        assert_eq!(config.user.id, UserId::new(7));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(session: (upload_document_state: true))").unwrap();
        let config = PraderaConfig::load(file.path()).unwrap();
        assert!(config.session.upload_document_state);
        assert_eq!(config.backend, Backend::Memory);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = PraderaConfig::load(&dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, PraderaConfig::default());
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(backend: Carrier)").unwrap();
        assert!(matches!(
            PraderaConfig::load(file.path()),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_written_config_reads_back() {
        let config = PraderaConfig {
            session: SessionConfig {
                debounce_ms: 10,
                ..SessionConfig::default()
            },
            ..PraderaConfig::default()
        };
        let text = config.to_ron().unwrap();
        assert_eq!(PraderaConfig::from_ron(&text).unwrap(), config);
    }
}
