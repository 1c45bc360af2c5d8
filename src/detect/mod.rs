//! Focus screening: does a frame hold a snow crystal in sharp focus?

mod focus;
mod result;
pub mod smoothing;

pub use focus::{ClassifierSettings, FocusClassifier};
pub use result::ClassificationResult;
pub use smoothing::{gradient_magnitude, SmoothingKernel};
