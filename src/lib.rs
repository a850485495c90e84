pub mod data;
pub mod descent;
pub mod engine;
pub mod error;
pub mod logistic;
pub mod nn;
pub mod ops;
pub mod tensor;

pub use engine::Value;
pub use error::{AutogradError, Result};
pub use tensor::{Scalar, Tensor};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-unique, increasing id for each new graph node.
fn get_id() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
