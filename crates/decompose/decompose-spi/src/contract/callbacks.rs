//! Callback types injected at construction.

use crate::model::MeanAccumulator;

/// Fired whenever the set of components changes and downstream residual
/// models must be rebuilt. An empty residual series signals "components
/// changed, no replacement history available".
pub type ComponentChangeCallback = Box<dyn FnMut(Vec<MeanAccumulator>)>;

/// User-visible model annotations ("Detected trend", ...).
pub type AnnotationCallback = Box<dyn FnMut(&str)>;
