//! The observable radio model.
//!
//! [`RadioController`] is the single place where the engine's event
//! sources meet: response completions and status lines from the control
//! session, inventory changes from discovery and the broker, and
//! statistics from the audio pipelines. It owns the session and the
//! pipelines, mediates user intent onto the wire, and emits a typed event
//! for every observable change.

mod controller;
mod eq;
mod slice;

pub use controller::{RadioController, StreamBinding};
pub use eq::EqualizerState;
pub use slice::{AgcMode, SliceMode, SliceState};
