use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown database '{database}': no client owns it")]
    Routing { database: String },

    #[error("Duplicate _id '{id}' in {database}/{collection}")]
    Conflict {
        database: String,
        collection: String,
        id: String,
    },

    #[error("Duplicate join key: {field} = '{value}'")]
    DuplicateKey { field: String, value: String },

    #[error("Database '{database}' has not been loaded")]
    NotLoaded { database: String },

    #[error("The {backend} client is closed")]
    Closed { backend: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StrataError>;
