//! threatsense - On-device multimodal threat estimation
//!
//! threatsense continuously estimates a person's physical-threat level by fusing
//! weak signals into a bounded risk score and a discrete alert state:
//! audio window → spectral features → emotion → speech threat, frame → motion
//! intensity, transcript → keyword threat, and situational context, combined
//! per tick by a reliability-weighted fusion engine with an emergency latch.
//!
//! ## Modules
//!
//! - **Signals**: `buffer`, `capture`, `features`, `classifier`, `speech`, `motion`, `context`
//! - **Fusion**: `fusion` (shared state), `pipeline` (one tick), `monitor` (lifecycle and threads)
//! - **Interop**: `ffi` (C ABI), `config` (JSON configuration)

pub mod buffer;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod fusion;
pub mod motion;
pub mod pipeline;
pub mod speech;
pub mod types;

mod monitor;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

#[cfg(test)]
mod tests_properties;

pub use buffer::{AudioWindow, FrameSlot, SampleBuffer};
pub use capture::{AudioCapture, FrameCapture, SyntheticAudioSource, SyntheticFrameSource};
pub use classifier::{ClassifierOutcome, EmotionClassifier, LinearEmotionModel, SpectralHeuristic, Unavailable};
pub use config::{AudioSourceKind, MonitorConfig};
pub use context::ContextEngine;
pub use error::ThreatError;
pub use features::{FeatureExtractor, FeatureVector};
pub use fusion::{FusionEngine, FusionInputs, FusionOutcome};
pub use monitor::{StartOutcome, StopOutcome, ThreatMonitor, ThreatMonitorBuilder};
pub use motion::{Frame, MotionScorer};
pub use pipeline::{ThreatPipeline, TickInputs, TickReport};
pub use speech::{keyword_score, SpeechScorer};
pub use types::{
    ContextSnapshot, Emotion, EmotionEstimate, EmotionSource, FusionState, LocationContext,
    ModalityContributions, MotionPhase, MotionReading, SpeechAssessment, StateTransition,
    ThreatHistoryEntry, ThreatSnapshot, ThreatState, Transcript,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
