//! Execution loop: classify failures, repair queries, and drive the
//! bounded self-correction cycle.

pub mod error_classifier;
pub mod error_recovery;
pub mod self_correction;
pub mod trace;

pub use error_classifier::*;
pub use error_recovery::*;
pub use self_correction::*;
pub use trace::*;
