use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level run configuration parsed from stratadb.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

/// One configured database. Order in the run configuration is priority
/// order: later databases shadow earlier ones in the chained view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_public")]
    pub public: bool,
    /// Serialization format for collections created in this database.
    #[serde(default)]
    pub format: Option<String>,
}

fn default_backend() -> String {
    BackendKind::Filesystem.as_str().to_string()
}

fn default_public() -> bool {
    true
}

impl DatabaseConfig {
    /// A public file-system database rooted at `path`.
    pub fn filesystem(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            name: name.into(),
            backend: default_backend(),
            path: Some(path.into()),
            url: None,
            public: true,
            format: None,
        }
    }

    /// A public remote database reached at `url`.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        DatabaseConfig {
            name: name.into(),
            backend: BackendKind::Remote.as_str().to_string(),
            path: None,
            url: Some(url.into()),
            public: true,
            format: None,
        }
    }

    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend.parse()
    }

    /// The storage directory; required by the file-system backend.
    pub fn storage_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            StrataError::Configuration(format!("database '{}' has no path", self.name))
        })
    }

    /// The endpoint; required by the remote backend.
    pub fn endpoint(&self) -> Result<&str> {
        self.url.as_deref().ok_or_else(|| {
            StrataError::Configuration(format!("database '{}' has no url", self.name))
        })
    }
}

/// Backend technologies a database can be stored with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Filesystem,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::Remote => "remote",
        }
    }
}

impl FromStr for BackendKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filesystem" | "fs" => Ok(BackendKind::Filesystem),
            "remote" => Ok(BackendKind::Remote),
            other => Err(StrataError::Configuration(format!(
                "unknown backend technology '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
