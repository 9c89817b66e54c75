use thiserror::Error;

/// Unified error type for `farmdist` operations.
#[derive(Debug, Error)]
pub enum FarmdistError {
    /// Raised when an estimator has fewer data points than it requires.
    #[error("insufficient data in {context}: need at least {required} observations, found {found}")]
    InsufficientData {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// Minimum number of observations the estimator requires.
        required: usize,
        /// Number of observations actually available.
        found: usize,
    },

    /// Raised when a grouping factor has too few distinct levels to pool over.
    #[error("model fit failed: grouping factor `{factor}` has {levels} distinct level(s), need at least 2")]
    DegenerateFactor {
        /// Name of the offending grouping factor.
        factor: &'static str,
        /// Number of distinct levels observed in the training data.
        levels: usize,
    },

    /// Raised when the regression target has no variance to explain.
    #[error("model fit failed: zero variance in {context}")]
    ZeroVariance { context: &'static str },

    /// Raised when the penalized normal equations cannot be factorized.
    #[error("model fit failed: normal equations in {context} are singular")]
    SingularSystem { context: &'static str },

    /// Raised when numerical routines produce NaN or infinity.
    #[error("encountered a non-finite value during {context}")]
    NonFinite { context: &'static str },

    /// Raised when a caller supplies out-of-range configuration.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// Value that was supplied.
        value: f64,
        /// Constraint the value violates.
        reason: &'static str,
    },

    /// Raised when a production value is zero or negative.
    #[error("production at record {index} must be strictly positive, found {value}")]
    NonPositiveProduction { index: usize, value: f64 },

    /// Raised when the same (country, crop, farm size) cell appears twice.
    #[error("duplicate record for country {country_id}, crop `{crop}`, farm size `{farm_size}`")]
    DuplicateCell {
        country_id: u32,
        crop: String,
        farm_size: String,
    },

    /// Raised when a categorical value is not part of the supported catalog.
    #[error("unknown {field} level `{level}`")]
    UnknownLevel {
        /// Which categorical field the level belongs to.
        field: &'static str,
        /// The unrecognized level.
        level: String,
    },

    /// Raised when a country carries conflicting country-level covariates.
    #[error("country {country_id} has conflicting values for {field}")]
    InconsistentCountry {
        country_id: u32,
        field: &'static str,
    },

    /// Raised when provided collections have incompatible lengths.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
}

impl FarmdistError {
    /// Helper to format an [`InsufficientData`](FarmdistError::InsufficientData) error.
    pub fn insufficient(context: &'static str, required: usize, found: usize) -> Self {
        Self::InsufficientData {
            context,
            required,
            found,
        }
    }

    /// Helper to raise when a matrix factorization fails due to singularity.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularSystem { context }
    }

    /// Helper to raise when a computation produced NaN or infinity.
    pub fn non_finite(context: &'static str) -> Self {
        Self::NonFinite { context }
    }

    /// Helper to format an [`InvalidParameter`](FarmdistError::InvalidParameter) error.
    pub fn invalid_parameter(name: &'static str, value: f64, reason: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            reason,
        }
    }

    /// Returns true for the model-fit family of errors (degenerate grouping
    /// factors, zero variance, singular systems, non-finite intermediates).
    pub fn is_model_fit(&self) -> bool {
        matches!(
            self,
            Self::DegenerateFactor { .. }
                | Self::ZeroVariance { .. }
                | Self::SingularSystem { .. }
                | Self::NonFinite { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, FarmdistError>;
