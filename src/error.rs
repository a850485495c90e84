use thiserror::Error;

/// Errors raised while building or differentiating a computation graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("backward called on a value that does not track gradients")]
    UntrackedRoot,

    #[error("shape mismatch during {operation}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("incompatible shapes for {operation}: {lhs:?} and {rhs:?}")]
    IncompatibleShapes {
        lhs: Vec<usize>,
        rhs: Vec<usize>,
        operation: String,
    },

    #[error("tensor data of length {len} does not fit shape {shape:?}")]
    InvalidData { len: usize, shape: Vec<usize> },

    #[error("invalid backward target: {0}")]
    InvalidBackwardTarget(String),
}

pub type Result<T> = std::result::Result<T, AutogradError>;
