//! Domain services for mscan-qp

pub mod matrix_detector;
pub mod story_generator;

pub use matrix_detector::{detect, MatrixDetection, MatrixFeatures};
pub use story_generator::StoryGenerator;
