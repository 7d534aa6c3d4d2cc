//! Custodia Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `LockState`, `ManagementCommand`, `UnlockAttempt`,
//!   `DeviceFingerprint`, `MismatchRecord`, `AuditEntry`
//! - **Port definitions** - Traits for adapters: `IStateRepository`,
//!   `ITransport`, `IDeviceControl`, `ILockScreen`, `IIdentitySource`
//! - **Configuration** - Typed YAML configuration with validated defaults
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement.
//! The enforcement services (`custodia-sync`, `custodia-guard`,
//! `custodia-integrity`) orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
