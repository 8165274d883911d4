//! Decomposition error types

mod decompose_error;

pub use decompose_error::{DecomposeError, Result};
