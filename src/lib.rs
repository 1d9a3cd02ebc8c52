//! tiltmirror: trader tilt detection and calibrated intervention.
//!
//! Perceive (market snapshot + interaction buffers) → Reason (tilt score
//! against a cached behavioral profile) → Intervene (severity, message,
//! UI directive). Start at [`orchestrator::CognitiveLoop`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod interaction;
pub mod intervention;
pub mod logging;
pub mod market;
pub mod orchestrator;
pub mod profile;
pub mod tilt;
pub mod trades;

#[cfg(test)]
mod testing;
