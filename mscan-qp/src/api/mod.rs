//! API endpoint handlers for mscan-qp

pub mod batch;
pub mod health;
pub mod matrix;
pub mod sse;

pub use batch::batch_routes;
pub use health::health_routes;
pub use matrix::matrix_routes;
pub use sse::event_stream;
