//! dnsfwd - DNS-resolved HTTP forwarder
//!
//! Resolves a logical backend name on every request and relays the request
//! to one of the resolved addresses.

pub mod config;
pub mod context;
pub mod http;
pub mod proxy;
pub mod resolver;
pub mod server;
