// Live-coding pattern generation from analysis results

pub mod generator;
pub mod style;

pub use generator::{generate, suggest_style, PatternError};
pub use style::{Style, StyleRules};
