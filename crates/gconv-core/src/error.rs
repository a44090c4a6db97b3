use crate::DType;

/// Errors raised by the grouped-convolution engine.
///
/// Configuration errors surface from `init`, runtime errors from `forward`.
/// Nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum GconvError {
    #[error("required {0} is missing")]
    MissingParam(&'static str),

    #[error("required resource '{0}' is missing")]
    MissingResource(&'static str),

    #[error("{what} {channels} is not divisible by group {group}")]
    IndivisibleGroup {
        what: &'static str,
        channels: usize,
        group: usize,
    },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("unsupported dtype: {0}")]
    UnsupportedDType(DType),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("no convolution implementation configured")]
    NoImplementation,

    #[error("group {group} forward failed: {source}")]
    GroupForward {
        group: usize,
        #[source]
        source: Box<GconvError>,
    },

    #[error("layer is {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },
}

impl GconvError {
    /// Whether this error belongs to the configuration class (fatal at init).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GconvError::MissingParam(_)
                | GconvError::MissingResource(_)
                | GconvError::IndivisibleGroup { .. }
                | GconvError::InvalidParam(_)
                | GconvError::UnsupportedDType(_)
                | GconvError::Unsupported(_)
        )
    }

    /// Whether this error belongs to the runtime class (fatal at forward).
    pub fn is_runtime_error(&self) -> bool {
        matches!(
            self,
            GconvError::NoImplementation | GconvError::GroupForward { .. }
        )
    }
}
