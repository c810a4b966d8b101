//! # Vault
//!
//! User-facing share accounting. Deposits arrive as NEP-141 transfers from
//! the underlying asset contract with a typed message; shares are minted at
//! the current NAV, rounded down. Redemptions burn shares first, source
//! liquidity through the allocator's plan (float, then lowest-APY pools),
//! and pay out through a cross-contract transfer whose callback rolls the
//! burn back on failure.
//!
//! Rounding always favors remaining holders: a deposit-then-redeem round
//! trip can never return more than was deposited.

use crate::allocator::PoolSlice;
use crate::vault_standards::events::{LossRealized, VaultDeposit, VaultWithdraw};
use crate::vault_standards::mul_div::Rounding;
use crate::vault_standards::VaultCore;
use crate::{Contract, ContractExt};
use near_contract_standards::fungible_token::metadata::{
    FungibleTokenMetadata, FungibleTokenMetadataProvider,
};
use near_contract_standards::fungible_token::{
    core::FungibleTokenCore, events::FtMint, receiver::FungibleTokenReceiver, FungibleTokenResolver,
};
use near_contract_standards::storage_management::StorageManagement;
use near_sdk::serde::Deserialize;
use near_sdk::{
    assert_one_yocto, env,
    json_types::{U128, U64},
    near, require, AccountId, NearToken, PromiseOrValue,
};

/// Typed message attached to an `ft_transfer_call` into the vault.
#[derive(Deserialize)]
#[serde(crate = "near_sdk::serde")]
#[serde(rename_all = "snake_case")]
pub enum FtTransferAction {
    Deposit(DepositMessage),
}

/// Deposit parameters.
#[derive(Deserialize, Default)]
#[serde(crate = "near_sdk::serde")]
pub struct DepositMessage {
    /// Refund the whole transfer if fewer shares would be minted.
    pub min_shares: Option<U128>,
    /// Cap the shares minted; the unused asset remainder is refunded.
    pub max_shares: Option<U128>,
    /// Account to credit with the shares (defaults to the sender).
    pub receiver_id: Option<AccountId>,
    pub memo: Option<String>,
    /// Raise NAV without minting shares (yield donation).
    pub donate: Option<bool>,
}

impl Contract {
    fn register_if_needed(&mut self, account_id: &AccountId) {
        if self.token.accounts.get(account_id).is_none() {
            self.token.internal_register_account(account_id);
        }
    }

    fn handle_deposit(
        &mut self,
        sender_id: AccountId,
        amount: U128,
        parsed_msg: DepositMessage,
    ) -> PromiseOrValue<U128> {
        self.require_not_paused();
        self.require_no_harvest_in_progress();
        require!(amount.0 > 0, "Deposit amount must be positive");

        if parsed_msg.donate.unwrap_or(false) {
            self.total_assets = self
                .total_assets
                .checked_add(amount.0)
                .expect("total_assets overflow");
            self.float = self.float.checked_add(amount.0).expect("float overflow");
            env::log_str(&format!("donation sender={} amount={}", sender_id, amount.0));
            return PromiseOrValue::Value(U128(0));
        }

        let calculated_shares = self.internal_convert_to_shares(amount.0, Rounding::Down);

        if let Some(min_shares) = parsed_msg.min_shares {
            if calculated_shares < min_shares.0 {
                return PromiseOrValue::Value(amount);
            }
        }

        let shares = match parsed_msg.max_shares {
            Some(max_shares) => calculated_shares.min(max_shares.0),
            None => calculated_shares,
        };

        // Charge the depositor for exactly the shares granted, rounded
        // against them; the remainder is refunded via the return value.
        let used_amount = self.internal_convert_to_assets(shares, Rounding::Up);
        let unused_amount = amount
            .0
            .checked_sub(used_amount)
            .expect("deposit refund underflow");

        require!(
            shares > 0 && used_amount > 0,
            "Deposit too small for current share price"
        );

        let owner_id = parsed_msg.receiver_id.unwrap_or(sender_id.clone());
        self.register_if_needed(&owner_id);
        self.token.internal_deposit(&owner_id, shares);
        self.total_assets = self
            .total_assets
            .checked_add(used_amount)
            .expect("total_assets overflow");
        self.float = self
            .float
            .checked_add(used_amount)
            .expect("float overflow");

        // Place the fresh principal per the allocation policy; whatever no
        // pool has headroom for stays in the float.
        let _ = self.execute_deploy(used_amount);

        FtMint {
            owner_id: &owner_id,
            amount: U128(shares),
            memo: Some("Deposit"),
        }
        .emit();

        VaultDeposit {
            sender_id: &sender_id,
            owner_id: &owner_id,
            assets: U128(used_amount),
            shares: U128(shares),
            memo: parsed_msg.memo.as_deref(),
        }
        .emit();

        PromiseOrValue::Value(U128(unused_amount))
    }
}

#[near]
impl Contract {
    /// Finalizes a withdrawal after the asset transfer, or rolls the burn
    /// back if the transfer failed.
    #[private]
    pub fn resolve_withdraw(
        &mut self,
        owner: AccountId,
        receiver: AccountId,
        shares: U128,
        assets: U128,
        memo: Option<String>,
    ) -> U128 {
        match env::promise_result(0) {
            near_sdk::PromiseResult::Successful(_) => {
                VaultWithdraw {
                    owner_id: &owner,
                    receiver_id: &receiver,
                    assets,
                    shares,
                    memo: memo.as_deref(),
                }
                .emit();

                assets
            }
            _ => {
                // Transfer failed: the tokens never left, so restore the
                // shares and put the assets back into the float.
                self.register_if_needed(&owner);
                self.token.internal_deposit(&owner, shares.0);
                self.total_assets = self
                    .total_assets
                    .checked_add(assets.0)
                    .expect("total_assets overflow");
                self.float = self.float.checked_add(assets.0).expect("float overflow");

                FtMint {
                    owner_id: &owner,
                    amount: U128(shares.0),
                    memo: Some("Withdrawal rollback"),
                }
                .emit();

                0.into()
            }
        }
    }

    /// Inspects the pool recall results for a redemption, then either pays
    /// the receiver or rolls the whole operation back (all-or-nothing).
    #[private]
    pub fn settle_redeem(
        &mut self,
        owner: AccountId,
        receiver: AccountId,
        shares: U128,
        assets: U128,
        float_part: U128,
        slices: Vec<PoolSlice>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128> {
        let actuals: Vec<u128> = slices
            .iter()
            .enumerate()
            .map(|(index, slice)| Self::pool_recall_result(index as u64, slice.amount.0))
            .collect();
        self.internal_settle_redeem(
            owner,
            receiver,
            shares.0,
            assets.0,
            float_part.0,
            slices,
            actuals,
            memo,
        )
    }

    /// Converts vault shares into governance credit by transferring them to
    /// the configured bridge account. Only the share-transfer effect lives
    /// here; voting-power mechanics are the bridge's concern.
    #[payable]
    pub fn convert_shares_to_governance(&mut self, shares: U128, memo: Option<String>) {
        assert_one_yocto();
        self.require_not_paused();
        require!(shares.0 > 0, "Share amount must be positive");

        let bridge = self
            .governance_bridge
            .clone()
            .unwrap_or_else(|| env::panic_str("Governance bridge not configured"));
        let owner = env::predecessor_account_id();
        self.register_if_needed(&bridge);
        self.token.internal_transfer(&owner, &bridge, shares.0, memo);
        env::log_str(&format!(
            "governance_conversion owner={} bridge={} shares={}",
            owner, bridge, shares.0
        ));
    }
}

impl Contract {
    /// Commits a redemption settlement from authoritative recall amounts.
    ///
    /// Any shortfall aborts the redemption: shares are restored at the
    /// pre-operation price, and whatever the pools did return is parked in
    /// the float (their allocations were already reduced by that much).
    /// A shortfall against a pool that was removed while the recall was in
    /// flight is realized as a loss, since no registry entry backs it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn internal_settle_redeem(
        &mut self,
        owner: AccountId,
        receiver: AccountId,
        shares: u128,
        assets: u128,
        float_part: u128,
        slices: Vec<PoolSlice>,
        actuals: Vec<u128>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128> {
        let requested: u128 = slices.iter().map(|s| s.amount.0).sum();
        let recalled: u128 = actuals.iter().sum();

        if recalled < requested {
            let mut written_off: u128 = 0;
            for (slice, actual) in slices.iter().zip(&actuals) {
                let shortfall = slice.amount.0 - actual;
                if shortfall == 0 {
                    continue;
                }
                match self.pools.get_mut(&slice.pool_id) {
                    Some(pool) => {
                        pool.allocated = pool
                            .allocated
                            .checked_add(shortfall)
                            .expect("allocation overflow");
                        pool.reported_balance = pool
                            .reported_balance
                            .checked_add(shortfall)
                            .expect("reported balance overflow");
                        env::log_str(&format!(
                            "pool_unavailable id={} op=withdraw requested={} actual={}",
                            slice.pool_id, slice.amount.0, actual
                        ));
                    }
                    None => {
                        // The pool was removed while the recall was in
                        // flight; the shortfall has no registry entry to
                        // return to and nothing backs it, so it is written
                        // down rather than silently re-credited.
                        written_off = written_off
                            .checked_add(shortfall)
                            .expect("written-off overflow");
                        LossRealized {
                            pool_id: slice.pool_id,
                            amount: U128(shortfall),
                            timestamp: U64(env::block_timestamp()),
                        }
                        .emit();
                    }
                }
            }

            self.float = self
                .float
                .checked_add(float_part + recalled)
                .expect("float overflow");
            self.total_assets = self
                .total_assets
                .checked_add(assets - written_off)
                .expect("total_assets overflow");
            self.register_if_needed(&owner);
            self.token.internal_deposit(&owner, shares);

            FtMint {
                owner_id: &owner,
                amount: U128(shares),
                memo: Some("Withdrawal rollback"),
            }
            .emit();
            env::log_str("withdrawal_rolled_back reason=insufficient_pool_liquidity");

            return PromiseOrValue::Value(U128(0));
        }

        // All slices arrived; pay the receiver from the vault account.
        PromiseOrValue::Promise(
            self.internal_transfer_assets_with_callback(receiver, assets, owner, shares, memo),
        )
    }
}

// ===== Vault standard surface =====
#[near]
impl VaultCore for Contract {
    fn asset(&self) -> AccountId {
        self.asset.clone()
    }

    fn total_assets(&self) -> U128 {
        U128(self.total_assets)
    }

    /// Burns `shares` and pays out their current NAV value, rounded down.
    ///
    /// All-or-nothing: if the float plus the active pools cannot cover the
    /// amount, the call panics before any state change.
    #[payable]
    fn redeem(
        &mut self,
        shares: U128,
        receiver_id: Option<AccountId>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128> {
        assert_one_yocto();
        self.require_not_paused();
        self.require_no_harvest_in_progress();

        let owner = env::predecessor_account_id();
        require!(shares.0 > 0, "Share amount must be positive");
        require!(
            shares.0 <= self.max_redeem(owner.clone()).0,
            "Insufficient shares"
        );

        let assets = self.internal_convert_to_assets(shares.0, Rounding::Down);
        require!(assets > 0, "Redemption amount rounds to zero");

        let plan = self.plan_withdrawal(assets);
        PromiseOrValue::Promise(self.internal_execute_withdrawal(
            owner,
            receiver_id,
            shares.0,
            assets,
            plan,
            memo,
        ))
    }

    /// Withdraws an exact asset amount, charging the share cost rounded up.
    #[payable]
    fn withdraw(
        &mut self,
        assets: U128,
        receiver_id: Option<AccountId>,
        memo: Option<String>,
    ) -> PromiseOrValue<U128> {
        assert_one_yocto();
        self.require_not_paused();
        self.require_no_harvest_in_progress();

        let owner = env::predecessor_account_id();
        require!(assets.0 > 0, "Withdrawal amount must be positive");

        let shares = self.internal_convert_to_shares(assets.0, Rounding::Up);
        require!(
            shares <= self.token.ft_balance_of(owner.clone()).0,
            "Insufficient shares"
        );

        let plan = self.plan_withdrawal(assets.0);
        PromiseOrValue::Promise(self.internal_execute_withdrawal(
            owner,
            receiver_id,
            shares,
            assets.0,
            plan,
            memo,
        ))
    }

    fn convert_to_shares(&self, assets: U128) -> U128 {
        U128(self.internal_convert_to_shares(assets.0, Rounding::Down))
    }

    fn convert_to_assets(&self, shares: U128) -> U128 {
        U128(self.internal_convert_to_assets(shares.0, Rounding::Down))
    }

    fn preview_withdraw(&self, assets: U128) -> U128 {
        U128(self.internal_convert_to_shares(assets.0, Rounding::Up))
    }
}

#[near]
impl FungibleTokenReceiver for Contract {
    /// Deposit entry point: only the underlying asset contract may call.
    fn ft_on_transfer(
        &mut self,
        sender_id: AccountId,
        amount: U128,
        msg: String,
    ) -> PromiseOrValue<U128> {
        require!(
            env::predecessor_account_id() == self.asset,
            "Only the underlying asset can call ft_on_transfer"
        );

        if msg.is_empty() {
            return self.handle_deposit(sender_id, amount, DepositMessage::default());
        }

        if let Ok(action) = serde_json::from_str::<FtTransferAction>(&msg) {
            match action {
                FtTransferAction::Deposit(deposit) => {
                    self.handle_deposit(sender_id, amount, deposit)
                }
            }
        } else {
            let deposit: DepositMessage = serde_json::from_str(&msg).unwrap_or_else(|_| {
                env::panic_str("Invalid ft_on_transfer message");
            });
            self.handle_deposit(sender_id, amount, deposit)
        }
    }
}

// ===== NEP-141 surface for the share token =====
#[near]
impl FungibleTokenCore for Contract {
    #[payable]
    fn ft_transfer(&mut self, receiver_id: AccountId, amount: U128, memo: Option<String>) {
        self.token.ft_transfer(receiver_id, amount, memo)
    }

    #[payable]
    fn ft_transfer_call(
        &mut self,
        receiver_id: AccountId,
        amount: U128,
        memo: Option<String>,
        msg: String,
    ) -> PromiseOrValue<U128> {
        self.token.ft_transfer_call(receiver_id, amount, memo, msg)
    }

    fn ft_total_supply(&self) -> U128 {
        self.token.ft_total_supply()
    }

    fn ft_balance_of(&self, account_id: AccountId) -> U128 {
        self.token.ft_balance_of(account_id)
    }
}

#[near]
impl FungibleTokenResolver for Contract {
    #[private]
    fn ft_resolve_transfer(
        &mut self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: U128,
    ) -> U128 {
        self.token
            .ft_resolve_transfer(sender_id, receiver_id, amount)
    }
}

#[near]
impl StorageManagement for Contract {
    #[payable]
    fn storage_deposit(
        &mut self,
        account_id: Option<AccountId>,
        registration_only: Option<bool>,
    ) -> near_contract_standards::storage_management::StorageBalance {
        self.token.storage_deposit(account_id, registration_only)
    }

    #[payable]
    fn storage_withdraw(
        &mut self,
        amount: Option<NearToken>,
    ) -> near_contract_standards::storage_management::StorageBalance {
        self.token.storage_withdraw(amount)
    }

    fn storage_balance_bounds(
        &self,
    ) -> near_contract_standards::storage_management::StorageBalanceBounds {
        self.token.storage_balance_bounds()
    }

    fn storage_balance_of(
        &self,
        account_id: AccountId,
    ) -> Option<near_contract_standards::storage_management::StorageBalance> {
        self.token.storage_balance_of(account_id)
    }

    #[payable]
    fn storage_unregister(&mut self, force: Option<bool>) -> bool {
        self.token.storage_unregister(force)
    }
}

#[near]
impl FungibleTokenMetadataProvider for Contract {
    fn ft_metadata(&self) -> FungibleTokenMetadata {
        self.metadata.clone()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
