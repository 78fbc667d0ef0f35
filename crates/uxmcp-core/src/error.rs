use std::fmt;

/// The machine-readable error kinds surfaced in HTTP responses, SSE terminal
/// events and execution traces (spec §7).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    // Input
    ValidationFailed,
    NameConflict,
    RouteConflict,
    UnknownService,
    UnknownAgent,
    UnknownProfile,
    // Runtime
    Timeout,
    Cancelled,
    DependencyMissing,
    UndeclaredDependency,
    BadResult,
    BadJson,
    OutputSchemaViolation,
    IterationsExhausted,
    RequiredToolMissing,
    // Upstream
    ProviderUnavailable,
    ProviderRateLimited,
    ProviderBadResponse,
    // Persistence
    StoreUnavailable,
    StoreConflict,
    // Internal
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ErrorKind {
    /// Maps an error kind to an HTTP status code per spec §7.
    pub fn status_code(&self) -> u16 {
        use ErrorKind::*;
        match self {
            ValidationFailed | BadJson => 400,
            UnknownService | UnknownAgent | UnknownProfile => 404,
            NameConflict | RouteConflict | StoreConflict => 409,
            Timeout => 408,
            _ => 500,
        }
    }
}

/// A structured error carrying a kind, an optional offending field, and a
/// human detail, mirroring the `{error_kind, field?, detail}` response body
/// required by spec §7.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind}: {detail}")]
pub struct UxmcpError {
    #[serde(rename = "error_kind")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub detail: String,
}

impl UxmcpError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            detail: detail.into(),
        }
    }

    pub fn with_field(kind: ErrorKind, field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            field: Some(field.into()),
            detail: detail.into(),
        }
    }

    pub fn bug(detail: impl Into<String>) -> Self {
        let e = Self::new(ErrorKind::Bug, detail);
        tracing::error!(kind = "Bug", detail = %e.detail, "invariant violation");
        e
    }
}

impl From<serde_json::Error> for UxmcpError {
    fn from(err: serde_json::Error) -> Self {
        UxmcpError::new(ErrorKind::BadJson, err.to_string())
    }
}

impl From<mongodb::error::Error> for UxmcpError {
    fn from(err: mongodb::error::Error) -> Self {
        UxmcpError::new(ErrorKind::StoreUnavailable, err.to_string())
    }
}

impl From<bson::ser::Error> for UxmcpError {
    fn from(err: bson::ser::Error) -> Self {
        UxmcpError::new(ErrorKind::StoreUnavailable, err.to_string())
    }
}
