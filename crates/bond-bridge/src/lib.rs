//! The `bond-bridge` library crate provides a set of APIs for discovering
//! Bond bridges within a network and driving the devices they control.
//!
//! A bridge exposes a local `REST` API to query and control its devices, and
//! a `UDP` push service which notifies device state changes as soon as they
//! happen.
//!
//! Core functionalities of this crate include:
//!
//! - Discovering bridges within the network through `mDNS-SD`, and acquiring
//!   their tokens
//! - Sending `REST` requests to bridges to list their devices, read their
//!   state, and execute actions on them
//! - Keeping a push session open with each bridge and delivering device state
//!   changes to a handler
//!
//! Expected failures, such as an unreachable bridge or a rejected request,
//! are logged and reported through return values. Errors are reserved to
//! unexpected failures.
//!
//! `bond-bridge` leverages `tokio` as an asynchronous executor: each push
//! session runs on its own task, independently of the other bridges and of
//! the `REST` calls issued by the caller.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// A client for the `REST` API of a bridge.
pub mod client;
/// Configuration of the `REST` transport and of the push listener.
pub mod config;
/// A controller for interacting with bridges.
pub mod controller;
/// Bridge and device data.
pub mod device;
/// A service for discovering bridges within a network and acquiring their
/// credentials.
pub mod discovery;
/// Error management.
pub mod error;
/// A listener of the device state changes pushed by a bridge.
pub mod push;
/// Execution of single `REST` calls.
pub mod transport;

pub use client::RestClient;
pub use config::{PushConfig, TransportConfig};
pub use controller::{Bridge, Controller};
pub use device::{BridgeEndpoint, BridgeInfo, DeviceDescriptor, DeviceKind, DeviceState};
pub use discovery::{BridgeInfoStatus, DiscoveredBridge, Discovery, TokenStatus};
pub use error::{Error, ErrorKind, Result};
pub use push::{PushListener, PushMessage, StateHandler, StateUpdate, Termination};
