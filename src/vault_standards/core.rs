//! Vault-standard trait for the share token.
//!
//! Mirrors the ERC-4626/NEP-621 surface: a vault wraps a single underlying
//! asset, issues proportional-ownership shares as a NEP-141 token, and
//! exposes conversion/preview/max queries alongside the redeem/withdraw
//! entry points. Conversions are left to the implementor so the rounding
//! direction can differ per call site; the `max_*`/`preview_*` queries get
//! defaults built on top of them.

use near_contract_standards::fungible_token::{receiver::FungibleTokenReceiver, FungibleTokenCore};
use near_sdk::{json_types::U128, AccountId, PromiseOrValue};
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

#[allow(unused)]
pub trait VaultCore: FungibleTokenCore + FungibleTokenReceiver {
    /// Account ID of the underlying NEP-141 asset.
    fn asset(&self) -> AccountId;

    /// Total assets under management (principal + realized yield).
    fn total_assets(&self) -> U128;

    /// Burns `shares` and transfers the equivalent assets to `receiver_id`.
    fn redeem(
        &mut self,
        shares: U128,
        receiver_id: Option<AccountId>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128>;

    /// Burns the shares equivalent to `assets` and transfers `assets` out.
    fn withdraw(
        &mut self,
        assets: U128,
        receiver_id: Option<AccountId>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128>;

    /// Assets-to-shares at the current NAV, rounded down.
    fn convert_to_shares(&self, assets: U128) -> U128;

    /// Shares-to-assets at the current NAV, rounded down.
    fn convert_to_assets(&self, shares: U128) -> U128;

    /// Maximum shares `owner_id` can redeem: their full share balance.
    fn max_redeem(&self, owner_id: AccountId) -> U128 {
        self.ft_balance_of(owner_id)
    }

    /// Maximum assets `owner_id` can withdraw: the value of their shares.
    fn max_withdraw(&self, owner_id: AccountId) -> U128 {
        self.convert_to_assets(self.ft_balance_of(owner_id))
    }

    /// Shares minted for a deposit of `assets`, rounded down.
    fn preview_deposit(&self, assets: U128) -> U128 {
        self.convert_to_shares(assets)
    }

    /// Assets returned for redeeming `shares`, rounded down.
    fn preview_redeem(&self, shares: U128) -> U128 {
        self.convert_to_assets(shares)
    }

    /// Shares burned for withdrawing `assets`, rounded up.
    fn preview_withdraw(&self, assets: U128) -> U128;
}
