use std::fmt;

use thiserror::Error;

/// Which kind of tagged object a dangling reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Outbound,
    Inbound,
    Balancer,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Outbound => write!(f, "outbound"),
            RefKind::Inbound => write!(f, "inbound"),
            RefKind::Balancer => write!(f, "balancer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("config validation failed: {0}")]
    ConfigValidation(String),

    #[error("dangling {kind} reference: '{tag}'")]
    DanglingReference { kind: RefKind, tag: String },

    #[error("no route matched: {0}")]
    NoRoute(String),

    #[error("no viable outbound for balancer '{0}'")]
    NoViableOutbound(String),

    #[error("share link parse error: {0}")]
    ShareLinkParse(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::ConfigValidation(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        Error::ShareLinkParse(msg.into())
    }

    pub fn dangling(kind: RefKind, tag: impl Into<String>) -> Self {
        Error::DanglingReference {
            kind,
            tag: tag.into(),
        }
    }

    /// Whether this error came from a bad configuration (build/save time).
    pub fn is_config(&self) -> bool {
        self.kind().is_config()
    }

    /// Whether this error only affects the connection being resolved.
    ///
    /// Such errors drop that connection; the router stays usable for the next one.
    pub fn is_connection_level(&self) -> bool {
        self.kind().is_connection_level()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigValidation(_) => ErrorKind::ConfigValidation,
            Error::DanglingReference { .. } => ErrorKind::DanglingReference,
            Error::NoRoute(_) => ErrorKind::NoRoute,
            Error::NoViableOutbound(_) => ErrorKind::NoViableOutbound,
            Error::ShareLinkParse(_) => ErrorKind::ShareLinkParse,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }
}

/// Lightweight error category for pattern matching without borrowing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigValidation,
    DanglingReference,
    NoRoute,
    NoViableOutbound,
    ShareLinkParse,
    Unsupported,
    Io,
    Json,
}

impl ErrorKind {
    pub fn is_config(self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigValidation | ErrorKind::DanglingReference | ErrorKind::Json
        )
    }

    pub fn is_connection_level(self) -> bool {
        matches!(self, ErrorKind::NoRoute | ErrorKind::NoViableOutbound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConfigValidation => "CONFIG_INVALID",
            ErrorKind::DanglingReference => "DANGLING_REF",
            ErrorKind::NoRoute => "NO_ROUTE",
            ErrorKind::NoViableOutbound => "NO_VIABLE_OUTBOUND",
            ErrorKind::ShareLinkParse => "LINK_PARSE",
            ErrorKind::Unsupported => "UNSUPPORTED",
            ErrorKind::Io => "IO",
            ErrorKind::Json => "JSON",
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::other(e.to_string())
    }
}
