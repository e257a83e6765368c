// Musical timing structures

pub mod grid;

pub use grid::{BeatGrid, InvalidBeatGrid, Subdivision, TimeSignature};
