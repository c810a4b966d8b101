//! # Fee Policy
//!
//! Pure fee-rate computation applied to harvested yield. The policy is a
//! free function over [`FeeConfig`] so it can be reasoned about and tested
//! independently of the vault and allocator: no state reads, no external
//! calls, identical inputs always produce identical output.
//!
//! ## Rate curve
//!
//! The base rate is scaled linearly by the market signal (aggregate APY in
//! basis points) relative to a configured reference APY, then clamped to
//! `[min_bps, max_bps]`:
//!
//! ```text
//! rate = clamp(base_bps * signal / reference_apy_bps, min_bps, max_bps)
//! fee  = gross_yield * rate / 10_000   (rounded down)
//! ```
//!
//! Guarantees: `0 <= fee <= gross_yield` for any inputs accepted by
//! [`FeeConfig::assert_valid`].

use near_sdk::{near, require};

use crate::vault_standards::mul_div::{mul_div, Rounding};

/// Basis-point denominator (10_000 bps = 100%).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Configuration for the harvest fee policy.
///
/// Set at init and owner-updatable. `base_bps` is the rate applied when the
/// market signal equals `reference_apy_bps`; `min_bps`/`max_bps` bound the
/// effective rate regardless of the signal.
#[near(serializers = [json, borsh])]
#[derive(Clone, Debug)]
pub struct FeeConfig {
    /// Base fee rate in basis points.
    pub base_bps: u16,
    /// Lower bound on the effective rate.
    pub min_bps: u16,
    /// Upper bound on the effective rate.
    pub max_bps: u16,
    /// Aggregate APY (bps) at which the effective rate equals `base_bps`.
    pub reference_apy_bps: u32,
}

impl FeeConfig {
    /// Validates the configured bounds.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are inverted, exceed 100%, or the reference APY
    /// is zero (which would make the curve undefined).
    pub fn assert_valid(&self) {
        require!(
            self.max_bps as u128 <= BPS_DENOMINATOR,
            "Fee rate bound exceeds 100%"
        );
        require!(self.min_bps <= self.max_bps, "Fee rate bounds inverted");
        require!(
            self.min_bps <= self.base_bps && self.base_bps <= self.max_bps,
            "Base fee rate outside bounds"
        );
        require!(self.reference_apy_bps > 0, "Reference APY must be positive");
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        // 10% base, bounded to [5%, 20%], reference 10% APY.
        Self {
            base_bps: 1_000,
            min_bps: 500,
            max_bps: 2_000,
            reference_apy_bps: 1_000,
        }
    }
}

/// Computes the effective fee rate (bps) for a given market signal.
///
/// The signal is the allocator's aggregate APY in basis points. A signal of
/// zero clamps to `min_bps`.
pub fn compute_fee_rate_bps(market_signal_bps: u32, config: &FeeConfig) -> u16 {
    let scaled =
        config.base_bps as u128 * market_signal_bps as u128 / config.reference_apy_bps as u128;
    scaled.clamp(config.min_bps as u128, config.max_bps as u128) as u16
}

/// Computes the fee amount retained from `gross_yield`.
///
/// Rounds down, so the fee can never exceed the gross yield as long as the
/// effective rate is at most 100% (enforced by [`FeeConfig::assert_valid`]).
pub fn compute_fee(gross_yield: u128, market_signal_bps: u32, config: &FeeConfig) -> u128 {
    if gross_yield == 0 {
        return 0;
    }
    let rate_bps = compute_fee_rate_bps(market_signal_bps, config);
    mul_div(gross_yield, rate_bps as u128, BPS_DENOMINATOR, Rounding::Down)
}
