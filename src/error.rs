use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which remote service a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedding,
    Chat,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Embedding => f.write_str("embedding"),
            Service::Chat => f.write_str("chat completion"),
        }
    }
}

/// How a remote call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The service answered with a non-success HTTP status
    Status(u16),
    /// The per-request timeout expired
    Timeout,
    /// The service could not be reached
    Unavailable,
    /// The body was not the JSON shape we expect
    MalformedResponse,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Status(code) => write!(f, "HTTP {}", code),
            RemoteErrorKind::Timeout => f.write_str("timed out"),
            RemoteErrorKind::Unavailable => f.write_str("unavailable"),
            RemoteErrorKind::MalformedResponse => f.write_str("malformed response"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Knowledge base directory '{}' does not exist", .0.display())]
    SourceDirNotFound(PathBuf),

    #[error("Vector store not found at {}. Please build the knowledge base first.", .0.display())]
    StoreNotBuilt(PathBuf),

    #[error("No .{extension} files found in '{}'", .dir.display())]
    NoDocuments { dir: PathBuf, extension: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} service error ({kind}): {detail}")]
    RemoteService {
        service: Service,
        kind: RemoteErrorKind,
        detail: String,
    },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt vector store at {}: {detail}", .path.display())]
    CorruptStore { path: PathBuf, detail: String },

    #[error("Vector store error at {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: lancedb::Error,
    },
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn store(path: impl Into<PathBuf>, source: lancedb::Error) -> Self {
        RagError::Store {
            path: path.into(),
            source,
        }
    }

    pub fn remote(service: Service, kind: RemoteErrorKind, detail: impl Into<String>) -> Self {
        RagError::RemoteService {
            service,
            kind,
            detail: detail.into(),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(service: Service, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            RemoteErrorKind::Timeout
        } else if err.is_decode() {
            RemoteErrorKind::MalformedResponse
        } else if let Some(status) = err.status() {
            RemoteErrorKind::Status(status.as_u16())
        } else {
            RemoteErrorKind::Unavailable
        };
        RagError::remote(service, kind, err.to_string())
    }

    /// True for both "source directory missing" and "store not built yet"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RagError::SourceDirNotFound(_) | RagError::StoreNotBuilt(_)
        )
    }

    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            RagError::RemoteService { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
