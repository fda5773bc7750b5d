//! FlexLine Core - protocol and streaming engine for FlexRadio 6000-series
//! transceivers.
//!
//! This crate is the headless heart of FlexLine: it negotiates the radio's
//! three wire surfaces concurrently and fuses them into one observable
//! model. GUI, settings persistence, credential storage, and audio device
//! I/O are external collaborators behind traits.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`]: control-channel codec (commands, line parsing, status bodies)
//! - [`vita`]: VITA-49 packet codec for discovery and DAX audio
//! - [`discovery`]: LAN beacon listener and the serial-keyed radio inventory
//! - [`control`]: TCP/TLS session state machine with sequenced request/response
//! - [`broker`]: SmartLink broker client for WAN sessions
//! - [`audio`]: DAX RX and mic TX pipelines
//! - [`radio`]: the observable radio model and command surface
//! - [`events`]: typed event system for observers
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Platform-specific concerns are decoupled behind traits, each with a
//! default implementation suitable for headless use:
//!
//! - [`EventEmitter`](events::EventEmitter): delivering domain events
//! - [`AudioOutput`](audio::AudioOutput): playback of decoded RX audio
//! - [`NoiseReducer`](audio::NoiseReducer): optional RX DSP
//! - [`TokenProvider`](auth::TokenProvider): bearer tokens for the broker

#![warn(clippy::all)]

pub mod audio;
pub mod auth;
pub mod broker;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod events;
pub mod protocol;
pub mod protocol_constants;
pub mod radio;
mod tls;
pub mod utils;
pub mod vita;

// Re-export commonly used types at the crate root
pub use audio::{
    AudioOutput, DaxRxPipeline, LinearResampler, LinearUpsampler, MicFeeder, MicTxPipeline,
    NoiseReducer, NullAudioOutput, PassthroughNoiseReducer, RxPath, StreamError,
};
pub use auth::{StaticTokenProvider, TokenProvider};
pub use broker::{BrokerClient, BrokerError, BrokerEvent};
pub use config::{AudioConfig, Config};
pub use control::{
    ConnectOptions, ConnectionKind, ConnectionStatus, ControlConnection, ControlError,
};
pub use discovery::{DiscoveredRadio, DiscoveryListener, RadioInventory, RadioSource};
pub use error::{ErrorCode, ErrorLogEntry, RadioError, RadioResult};
pub use events::{
    AudioEvent, BroadcastEventBridge, ConnectionEvent, DiscoveryEvent, EqEvent, EventEmitter,
    LoggingEventEmitter, NoopEventEmitter, RadioEvent, RadioRemovalReason, SliceEvent,
    TransmitEvent,
};
pub use radio::{
    AgcMode, EqualizerState, RadioController, SliceMode, SliceState, StreamBinding,
};
pub use utils::now_millis;
