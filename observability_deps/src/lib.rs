//! Observability ecosystem dependencies, re-exported from one place so every crate in the
//! workspace logs through the same `tracing` version.

pub use tracing;
