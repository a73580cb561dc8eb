/// Top-level tether error type.
#[derive(thiserror::Error, Debug)]
pub enum TetherError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Graph engine error: {0}")]
    Graph(#[from] tether_graphs::GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Unsupported store schema version {found} (supported: {supported} and one before)")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Invariant violation: {0}")]
    State(String),
}

/// Per-file parse failures. Accumulated in the scan report; individual
/// failures never abort a scan.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Malformed YAML in {path}: {detail}")]
    MalformedYaml { path: String, detail: String },

    #[error("Missing required field '{field}' in {path}")]
    MissingField { path: String, field: &'static str },

    #[error("Bad GUID '{value}' in {path}")]
    BadGuid { path: String, value: String },

    #[error("Unknown importer '{importer}' in {path}")]
    UnknownImporter { path: String, importer: String },

    #[error("Parse of {path} exceeded {seconds}s deadline")]
    Timeout { path: String, seconds: u64 },

    #[error("File {path} exceeds size limit ({size} bytes)")]
    TooLarge { path: String, size: u64 },
}

/// Kind discriminant for error counting in scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    MalformedYaml,
    MissingGuid,
    BadGuid,
    UnknownImporter,
    Timeout,
    TooLarge,
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            Self::MalformedYaml { .. } => ParseErrorKind::MalformedYaml,
            Self::MissingField { .. } => ParseErrorKind::MissingGuid,
            Self::BadGuid { .. } => ParseErrorKind::BadGuid,
            Self::UnknownImporter { .. } => ParseErrorKind::UnknownImporter,
            Self::Timeout { .. } => ParseErrorKind::Timeout,
            Self::TooLarge { .. } => ParseErrorKind::TooLarge,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::MalformedYaml { path, .. }
            | Self::MissingField { path, .. }
            | Self::BadGuid { path, .. }
            | Self::UnknownImporter { path, .. }
            | Self::Timeout { path, .. }
            | Self::TooLarge { path, .. } => path,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, TetherError>;
