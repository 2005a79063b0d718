//! Motion detection module
//!
//! Turns video frames into a bounded, fusion-safe motion intensity using an
//! adaptive background model.
//!
//! Pipeline: Frame → BackgroundModel → ForegroundMask → morphology → MotionScorer

pub mod background;
pub mod frame;
pub mod morphology;
pub mod scorer;

pub use background::BackgroundModel;
pub use frame::{ForegroundMask, Frame};
pub use scorer::MotionScorer;
