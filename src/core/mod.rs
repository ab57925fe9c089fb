//! Core acquisition building blocks: image specs, the value types flowing
//! through a run, scene compilation, mosaic reconciliation, post-processing
//! and cancellation. These are internal primitives consumed by the
//! high-level `api` module.
pub mod cancel;
pub mod model;
pub mod mosaic;
pub mod processing;
pub mod scenes;
pub mod specs;
