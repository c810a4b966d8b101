//! # Vault Events
//!
//! Observable log records for vault operations, emitted as JSON logs
//! prefixed with `EVENT_JSON:` (NEP-297 format).
//!
//! ## Event Types
//!
//! - `VaultDeposit`: assets entered the vault, shares were minted
//! - `VaultWithdraw`: shares were burned, assets were transferred out
//! - `YieldHarvested`: accrued yield was realized into NAV, net of fee
//! - `LossRealized`: a pool's balance fell below its allocated principal
//! - `PoolRebalanced`: principal moved between a pool and the vault float

use near_sdk::json_types::{U128, U64};
use near_sdk::serde::Serialize;
use near_sdk::{env, AccountIdRef};

/// Top-level event wrapper carrying the standard tag.
#[derive(Serialize, Debug)]
#[serde(crate = "near_sdk::serde")]
#[serde(tag = "standard")]
#[must_use = "don't forget to `.emit()` this event"]
#[serde(rename_all = "snake_case")]
pub(crate) enum NearEvent<'a> {
    YieldVault(YieldVaultEvent<'a>),
}

impl<'a> NearEvent<'a> {
    fn to_json_string(&self) -> String {
        #[allow(clippy::redundant_closure)]
        serde_json::to_string(self)
            .ok()
            .unwrap_or_else(|| env::abort())
    }

    fn to_json_event_string(&self) -> String {
        format!("EVENT_JSON:{}", self.to_json_string())
    }

    /// Logs the event to the runtime. Must be called to actually emit.
    pub(crate) fn emit(self) {
        near_sdk::env::log_str(&self.to_json_event_string());
    }
}

/// Emitted when assets are deposited and shares are minted.
#[must_use]
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "near_sdk::serde")]
pub struct VaultDeposit<'a> {
    /// The account that sent the assets.
    pub sender_id: &'a AccountIdRef,
    /// The account that received the shares.
    pub owner_id: &'a AccountIdRef,
    /// The amount of assets deposited.
    pub assets: U128,
    /// The amount of shares minted.
    pub shares: U128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<&'a str>,
}

impl VaultDeposit<'_> {
    pub fn emit(self) {
        Self::emit_many(&[self])
    }

    pub fn emit_many(data: &[VaultDeposit<'_>]) {
        new_event(YieldVaultEventKind::VaultDeposit(data)).emit()
    }
}

/// Emitted when shares are burned and assets are transferred out.
#[must_use]
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "near_sdk::serde")]
pub struct VaultWithdraw<'a> {
    /// The account that owned the shares.
    pub owner_id: &'a AccountIdRef,
    /// The account that received the assets.
    pub receiver_id: &'a AccountIdRef,
    /// The amount of shares burned.
    pub shares: U128,
    /// The amount of assets transferred.
    pub assets: U128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<&'a str>,
}

impl VaultWithdraw<'_> {
    pub fn emit(self) {
        Self::emit_many(&[self])
    }

    pub fn emit_many(data: &[VaultWithdraw<'_>]) {
        new_event(YieldVaultEventKind::VaultWithdraw(data)).emit()
    }
}

/// Emitted when a harvest settles: gross yield collected across pools,
/// fee routed to the collector, remainder credited to NAV.
#[must_use]
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "near_sdk::serde")]
pub struct YieldHarvested {
    /// Gross yield collected across all pools.
    pub total_yield: U128,
    /// Fee amount retained for the protocol.
    pub fee: U128,
    /// Block timestamp (nanoseconds) of settlement.
    pub timestamp: U64,
}

impl YieldHarvested {
    pub fn emit(self) {
        new_event(YieldVaultEventKind::YieldHarvested(&[self])).emit()
    }
}

/// Emitted when a pool's reported balance is below its allocated principal.
/// Distinct from [`YieldHarvested`]: the loss is written down into NAV.
#[must_use]
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "near_sdk::serde")]
pub struct LossRealized {
    /// The pool where the loss occurred.
    pub pool_id: u64,
    /// The amount written down from NAV.
    pub amount: U128,
    /// Block timestamp (nanoseconds) of realization.
    pub timestamp: U64,
}

impl LossRealized {
    pub fn emit(self) {
        new_event(YieldVaultEventKind::LossRealized(&[self])).emit()
    }
}

/// Emitted for each completed rebalance move.
#[must_use]
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "near_sdk::serde")]
pub struct PoolRebalanced {
    /// The pool principal moved out of or into.
    pub pool_id: u64,
    /// The amount of principal moved.
    pub amount: U128,
    /// `"recall"` (pool to float) or `"deploy"` (float to pool).
    pub direction: &'static str,
}

impl PoolRebalanced {
    pub fn emit(self) {
        new_event(YieldVaultEventKind::PoolRebalanced(&[self])).emit()
    }
}

/// Event payload: version plus the flattened kind/data pair.
#[derive(Serialize, Debug)]
#[serde(crate = "near_sdk::serde")]
pub(crate) struct YieldVaultEvent<'a> {
    version: &'static str,
    #[serde(flatten)]
    event_kind: YieldVaultEventKind<'a>,
}

#[derive(Serialize, Debug)]
#[serde(crate = "near_sdk::serde")]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
enum YieldVaultEventKind<'a> {
    VaultDeposit(&'a [VaultDeposit<'a>]),
    VaultWithdraw(&'a [VaultWithdraw<'a>]),
    YieldHarvested(&'a [YieldHarvested]),
    LossRealized(&'a [LossRealized]),
    PoolRebalanced(&'a [PoolRebalanced]),
}

fn new_event(event_kind: YieldVaultEventKind) -> NearEvent {
    NearEvent::YieldVault(YieldVaultEvent {
        version: "1.0.0",
        event_kind,
    })
}
