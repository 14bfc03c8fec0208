/// Shared error type returned by every fallible operation in the engine and
/// the gateway. Each variant carries enough context to log usefully and maps
/// to exactly one HTTP status at the response boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status this error maps to. Kept free of any web-framework type so
    /// both `wsb-engine` and `wsb-gateway` can use it without a dependency edge.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) | Error::Conflict(_) => 404,
            Error::Forbidden(_) => 403,
            Error::Unauthenticated => 401,
            Error::BadRequest(_) => 400,
            Error::MethodNotAllowed => 405,
            Error::LockBusy(_) => 500,
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Internal(_) => 500,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
