use thiserror::Error;

/// The closed set of failure kinds the core can produce.
///
/// No exception hierarchy: every failure site picks one of these variants
/// and attaches whatever structured context it has. `retriable()` and
/// `http_status_hint()` let callers (the chain loop, the eventual HTTP
/// layer) make decisions without re-deriving classification logic.
#[derive(Debug, Error, Clone)]
pub enum ElevationError {
    #[error("index queried before load completed")]
    IndexNotReady,

    #[error("index schema version {found} is incompatible with supported major version {supported}")]
    SchemaVersion { found: String, supported: String },

    #[error("unparseable bounds record: {reason}")]
    BoundsFormat { reason: String },

    #[error("object not found: {uri}")]
    RasterMissing { uri: String },

    #[error("access denied reading object: {uri}")]
    RasterAccess { uri: String },

    #[error("no coordinate transform available for CRS {crs}")]
    UnsupportedCrs { crs: String },

    #[error("deadline exceeded after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("rate limited{}", retry_after_ms.map(|m| format!(", retry after {m}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("request queue is full")]
    Overloaded,
}

impl ElevationError {
    /// Whether a fresh attempt of the same operation might succeed.
    pub fn retriable(&self) -> bool {
        match self {
            ElevationError::Timeout { .. } | ElevationError::Transient { .. } => true,
            ElevationError::RateLimited { retry_after_ms } => retry_after_ms.is_some(),
            ElevationError::IndexNotReady
            | ElevationError::SchemaVersion { .. }
            | ElevationError::BoundsFormat { .. }
            | ElevationError::RasterMissing { .. }
            | ElevationError::RasterAccess { .. }
            | ElevationError::UnsupportedCrs { .. }
            | ElevationError::InvalidInput { .. }
            | ElevationError::Overloaded => false,
        }
    }

    /// Status code an HTTP layer would map this to. The core never emits
    /// HTTP itself; this exists so that mapping is a pure lookup.
    pub fn http_status_hint(&self) -> u16 {
        match self {
            ElevationError::InvalidInput { .. } => 400,
            ElevationError::RateLimited { .. } => 429,
            ElevationError::Overloaded => 503,
            _ => 500,
        }
    }

    /// Short machine-stable tag, used as the `error_kind` telemetry field.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ElevationError::IndexNotReady => "ErrIndexNotReady",
            ElevationError::SchemaVersion { .. } => "ErrSchemaVersion",
            ElevationError::BoundsFormat { .. } => "ErrBoundsFormat",
            ElevationError::RasterMissing { .. } => "ErrRasterMissing",
            ElevationError::RasterAccess { .. } => "ErrRasterAccess",
            ElevationError::UnsupportedCrs { .. } => "ErrUnsupportedCRS",
            ElevationError::Timeout { .. } => "ErrTimeout",
            ElevationError::Transient { .. } => "ErrTransient",
            ElevationError::RateLimited { .. } => "ErrRateLimited",
            ElevationError::InvalidInput { .. } => "ErrInvalidInput",
            ElevationError::Overloaded => "ErrOverloaded",
        }
    }
}

pub type Result<T> = std::result::Result<T, ElevationError>;
