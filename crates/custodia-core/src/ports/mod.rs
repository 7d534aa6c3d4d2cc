//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IStateRepository`] - Persistent storage for lock state, queue,
//!   attempts, baseline, mismatch records, audit entries
//! - [`ITransport`] - Remote authority exchange (heartbeat, commands, alerts)
//! - [`IDeviceControl`] - Privileged platform capability that physically
//!   blocks interaction
//! - [`ILockScreen`] - Blocking overlay signalling (rendering is external)
//! - [`IIdentitySource`] - Raw device identifier collection

pub mod device_control;
pub mod identity;
pub mod lock_screen;
pub mod state_repository;
pub mod transport;

pub use device_control::{ControlError, IDeviceControl};
pub use identity::IIdentitySource;
pub use lock_screen::ILockScreen;
pub use state_repository::IStateRepository;
pub use transport::{
    CommandResponse, HeartbeatRequest, HeartbeatResponse, ITransport, LockStatusReport,
    MismatchAlert, RemoteLockSnapshot, SuspiciousActivityAlert, TransportError,
};
