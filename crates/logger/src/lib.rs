//! Tracing subscriber setup shared by the pulse binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, init_tracing_with};
