// Audio loading and feature extraction

pub mod features;
pub mod source;

pub use source::{load, AudioBuffer, AudioError};
