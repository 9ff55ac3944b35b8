//! Forwarding core
//!
//! This module implements the resolve-then-forward path: address selection,
//! outbound request construction and the response relay.

pub mod error;
pub mod forwarder;
pub mod selector;
pub mod upstream;

pub use error::ForwardError;
pub use forwarder::{Forwarder, RelayOutcome};
pub use selector::{SelectionPolicy, Selector};
pub use upstream::{BodyFraming, RelayedRequest, Upstream};
