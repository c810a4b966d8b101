//! # Internal Vault Operations
//!
//! Share/asset conversion helpers and the withdrawal executor. These
//! implement the core accounting used by the public vault surface.
//!
//! Withdrawals follow the CEI (Checks-Effects-Interactions) pattern:
//! all bookkeeping commits before any cross-contract call, and the resolve
//! callbacks roll the bookkeeping back if a transfer fails. Rounding always
//! favors remaining holders: shares minted and assets paid out round down,
//! shares charged round up.

use near_contract_standards::fungible_token::{
    core::ext_ft_core, events::FtBurn, FungibleTokenCore,
};
use near_sdk::{
    env, ext_contract, json_types::U128, require, AccountId, Gas, NearToken, Promise,
};

use super::mul_div::{mul_div, Rounding};
use crate::allocator::{ext_pool, PoolSlice, WithdrawalPlan};
use crate::Contract;

/// Gas allocation for the asset transfer during withdrawal.
pub const GAS_FOR_FT_TRANSFER: Gas = Gas::from_tgas(30);

/// Gas allocation for a single pool recall.
pub const GAS_FOR_POOL_WITHDRAW: Gas = Gas::from_tgas(20);

/// Gas reserved for the redemption settle callback (it still has to run
/// the user payout and its resolve callback).
pub const GAS_FOR_SETTLE_REDEEM: Gas = Gas::from_tgas(50);

/// Callback interface on the vault itself.
#[ext_contract(ext_self)]
pub trait _ExtSelf {
    /// Finalizes or rolls back a withdrawal after the asset transfer.
    fn resolve_withdraw(
        &mut self,
        owner: AccountId,
        receiver: AccountId,
        shares: U128,
        assets: U128,
        memo: Option<String>,
    );

    /// Inspects pool recall results, then pays the user or rolls back.
    fn settle_redeem(
        &mut self,
        owner: AccountId,
        receiver: AccountId,
        shares: U128,
        assets: U128,
        float_part: U128,
        slices: Vec<PoolSlice>,
        memo: Option<String>,
    );

    /// Settles a harvest from the staged pool recalls.
    fn settle_harvest(&mut self, staged: Vec<PoolSlice>);

    /// Rebooks a harvest fee whose transfer to the collector failed.
    fn resolve_fee_transfer(&mut self, amount: U128);

    /// Reverts a deploy slice if the transfer to the pool failed.
    fn resolve_deploy(&mut self, pool_id: u64, amount: U128);

    /// Commits a rebalance recall from its observed outcome.
    fn resolve_rebalance_recall(&mut self, pool_id: u64, requested: U128);

    /// Commits the implicit full recall preceding pool removal.
    fn resolve_remove_pool(&mut self, pool_id: u64, requested: U128);
}

impl Contract {
    /// Transfers assets to `receiver_id` with a resolution callback that
    /// rolls back the burn on failure.
    pub fn internal_transfer_assets_with_callback(
        &self,
        receiver_id: AccountId,
        amount: u128,
        owner: AccountId,
        shares: u128,
        memo: Option<String>,
    ) -> Promise {
        ext_ft_core::ext(self.asset.clone())
            .with_attached_deposit(NearToken::from_yoctonear(1))
            .with_static_gas(GAS_FOR_FT_TRANSFER)
            .ft_transfer(receiver_id.clone(), U128(amount), memo.clone())
            .then(
                ext_self::ext(env::current_account_id())
                    .with_static_gas(Gas::from_tgas(10))
                    .resolve_withdraw(owner, receiver_id, U128(shares), U128(amount), memo),
            )
    }

    /// Executes a withdrawal against a pre-computed liquidity plan.
    ///
    /// 1. **Checks**: share balance, amount bounds.
    /// 2. **Effects**: burns shares, decrements `total_assets`, the float,
    ///    and each planned pool's ledger entry.
    /// 3. **Interactions**: recalls the planned pool slices, then pays the
    ///    receiver; `settle_redeem`/`resolve_withdraw` roll back on failure.
    ///
    /// The plan must already cover `assets_to_transfer` in full; callers
    /// run `plan_withdrawal` (which panics on a shortfall) before any
    /// state changes, keeping the operation all-or-nothing.
    pub fn internal_execute_withdrawal(
        &mut self,
        owner: AccountId,
        receiver_id: Option<AccountId>,
        shares_to_burn: u128,
        assets_to_transfer: u128,
        plan: WithdrawalPlan,
        memo: Option<String>,
    ) -> Promise {
        let receiver_id = receiver_id.unwrap_or(owner.clone());

        // Checks
        require!(
            self.token.ft_balance_of(owner.clone()).0 >= shares_to_burn,
            "Insufficient shares"
        );
        require!(assets_to_transfer > 0, "No assets to withdraw");
        require!(
            assets_to_transfer <= self.total_assets,
            "Insufficient vault assets"
        );

        // Effects
        self.token.internal_withdraw(&owner, shares_to_burn);
        self.total_assets = self
            .total_assets
            .checked_sub(assets_to_transfer)
            .expect("total_assets underflow");
        self.float = self
            .float
            .checked_sub(plan.float_part)
            .expect("float underflow");
        for slice in &plan.slices {
            let pool = self
                .pools
                .get_mut(&slice.pool_id)
                .expect("Pool missing from plan");
            pool.allocated = pool
                .allocated
                .checked_sub(slice.amount.0)
                .expect("allocation underflow");
            pool.reported_balance = pool.reported_balance.saturating_sub(slice.amount.0);
        }

        FtBurn {
            owner_id: &owner,
            amount: U128(shares_to_burn),
            memo: Some("Withdrawal"),
        }
        .emit();

        // Interactions
        if plan.slices.is_empty() {
            // Float covers the whole amount; pay out directly.
            return self.internal_transfer_assets_with_callback(
                receiver_id,
                assets_to_transfer,
                owner,
                shares_to_burn,
                memo,
            );
        }

        let mut recalls: Option<Promise> = None;
        for slice in &plan.slices {
            let account = self
                .pools
                .get(&slice.pool_id)
                .expect("Pool missing from plan")
                .account_id
                .clone();
            let call = ext_pool::ext(account)
                .with_static_gas(GAS_FOR_POOL_WITHDRAW)
                .pool_withdraw(slice.amount);
            recalls = Some(match recalls {
                Some(p) => p.and(call),
                None => call,
            });
        }

        recalls.expect("non-empty plan").then(
            ext_self::ext(env::current_account_id())
                .with_static_gas(GAS_FOR_SETTLE_REDEEM)
                .settle_redeem(
                    owner,
                    receiver_id,
                    U128(shares_to_burn),
                    U128(assets_to_transfer),
                    U128(plan.float_part),
                    plan.slices,
                    memo,
                ),
        )
    }

    /// Assets-to-shares at the current NAV.
    ///
    /// 1:1 while no shares exist. Returns 0 when shares exist but the NAV
    /// has collapsed to zero, which rejects deposits rather than minting
    /// unbounded shares against a worthless vault.
    pub fn internal_convert_to_shares(&self, assets: u128, rounding: Rounding) -> u128 {
        let total_supply = self.token.ft_total_supply().0;

        if total_supply == 0 {
            return assets;
        }

        if self.total_assets == 0 {
            return 0;
        }

        mul_div(assets, total_supply, self.total_assets, rounding)
    }

    /// Shares-to-assets at the current NAV. 1:1 while no shares exist.
    pub fn internal_convert_to_assets(&self, shares: u128, rounding: Rounding) -> u128 {
        let total_supply = self.token.ft_total_supply().0;

        if total_supply == 0 {
            return shares;
        }

        mul_div(shares, self.total_assets, total_supply, rounding)
    }
}
