use thiserror::Error;

/// Errors returned by fitting, backfitting, and persistence in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Requested cluster count is incompatible with the dataset.
    #[error("invalid cluster count: requested {requested}, but dataset has {n_items} items")]
    InvalidClusterCount {
        /// Requested number of clusters.
        requested: usize,
        /// Number of items in the dataset.
        n_items: usize,
    },

    /// Vectors have inconsistent channel counts.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected number of channels.
        expected: usize,
        /// Found number of channels.
        found: usize,
    },

    /// A topography vector has (numerically) zero norm.
    #[error("degenerate vector at index {index}: norm is zero")]
    DegenerateVector {
        /// Index of the offending vector in the input.
        index: usize,
    },

    /// A cluster lost all members and could not be reseeded.
    #[error("cluster {cluster} is empty and no distinct vector is left to reseed it")]
    EmptyCluster {
        /// Index of the empty cluster.
        cluster: usize,
    },

    /// The fit was aborted through its cancellation token.
    #[error("fit cancelled")]
    Cancelled,

    /// Filesystem error while saving or loading a cluster set.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed cluster-set file.
    #[error("invalid cluster set file: {0}")]
    Format(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Format(e.to_string())
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
