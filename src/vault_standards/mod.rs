//! # Vault Standards Module
//!
//! Vault-standard surface for the share token: the [`VaultCore`] trait with
//! conversion/preview defaults, NEP-297 event logging, the internal
//! share/asset accounting, and safe fixed-point math.
//!
//! ## Module Organization
//!
//! - [`core`]: Trait definition and default implementations for vault operations
//! - [`events`]: `EVENT_JSON:` log records for deposits, withdrawals, harvests
//! - [`internal`]: Share/asset conversions and the CEI withdrawal executor
//! - [`mul_div`]: Safe multiplication and division with configurable rounding

pub mod core;
pub mod events;
pub mod internal;
pub mod mul_div;

pub use self::core::*;
