//! Core library for the `netatmo` CLI.
//!
//! This crate defines:
//! - OAuth token lifecycle (exchange, refresh-ahead, coalesced refreshes)
//! - Mapping between module capabilities and `getmeasure` wire fields
//! - Decoders turning API responses into station and measurement models
//! - The API client tying them together over a pluggable transport
//! - Configuration & credentials handling
//!
//! It is used by `netatmo-cli`, but can also be reused by other binaries or services.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod model;
pub mod transport;

pub use auth::{ClientCredentials, Credentials, Scope, TokenManager, TokenState};
pub use client::{ClientConfig, NetatmoClient};
pub use config::Config;
pub use error::{Error, Result, TransportError};
pub use model::{
    Capability, CapabilitySet, MainModule, MeasureRequest, Measurement, MeasurementType,
    Measurements, Module, ModuleKind, Scale, StationData,
};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
