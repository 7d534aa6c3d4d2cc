//! Custodia Transport - HTTP adapter for the remote authority
//!
//! Implements the `ITransport` port from `custodia-core` over plain
//! JSON-over-HTTPS. Wire security beyond standard TLS is out of scope;
//! authentication is the deployment's concern (reverse proxy, mTLS).
//!
//! Error classification is what the enforcement core keys on:
//! - connection/timeout/5xx → `TransportError::Connectivity`/`Timeout`
//!   (recoverable, triggers queueing)
//! - 4xx → `TransportError::Rejected` (the authority's definitive answer)

pub mod client;

pub use client::HttpTransport;
