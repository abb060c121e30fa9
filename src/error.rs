use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    InvalidInput,
    Unauthorized,
    Forbidden,
    Conflict,
    NotFound,
    RateLimited,
    Render,
    Unknown,
}

/// Service error with a client-safe public message and an internal
/// source chain that is only ever logged, never returned to callers.
#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    /// Itemized violations for validation failures.
    pub details: Option<Vec<String>>,
    /// Seconds until the client may retry; set for rate-limit errors.
    pub retry_after: Option<u64>,
    pub source: anyhow::Error,
}

impl LibError {
    fn new(
        kind: ErrorKind,
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind,
            code,
            public,
            details: None,
            retry_after: None,
            source,
        }
    }

    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Database, "database_error", public, source)
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::InvalidInput, "invalid_input", public, source)
    }

    pub fn invalid_with_details(
        public: &'static str,
        details: Vec<String>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::new(ErrorKind::InvalidInput, "validation_failed", public, source)
        }
    }

    pub fn unauthorized(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unauthorized, "unauthorized", public, source)
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Forbidden, "forbidden", public, source)
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Conflict, "conflict", public, source)
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", public, source)
    }

    pub fn rate_limited(retry_after_secs: u64, source: anyhow::Error) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new(
                ErrorKind::RateLimited,
                "rate_limited",
                "Too many requests",
                source,
            )
        }
    }

    pub fn render(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Render, "render_error", public, source)
    }

    pub fn server_misconfigured(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unknown, "server_misconfigured", public, source)
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unknown, "unknown_error", public, source)
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow!(value))
    }
}
