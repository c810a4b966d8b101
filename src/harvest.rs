//! # Harvest
//!
//! Realizes accrued pool yield into the vault's NAV, net of fee. The cycle
//! is an explicit two-phase protocol:
//!
//! 1. **Gather** (synchronous): per active pool, compare the oracle-synced
//!    balance against allocated principal. Losses are written down
//!    immediately and emitted as `loss_realized`; positive accruals are
//!    collected into a staging plan without touching canonical state.
//! 2. **Settle** (callback): the staged yield is recalled from the pools;
//!    the callback sums the authoritative actual amounts, runs the fee
//!    policy, routes the fee to the collector, and credits the remainder to
//!    `total_assets` in one atomic step.
//!
//! A mutual-exclusion lock is held across the promise window so no deposit,
//! withdrawal, or rebalance can observe (or corrupt) NAV mid-harvest.

use near_sdk::{
    env,
    json_types::{U128, U64},
    near, require, Gas, NearToken, Promise, PromiseOrValue, PromiseResult,
};

use near_contract_standards::fungible_token::core::ext_ft_core;

use crate::allocator::{ext_pool, PoolSlice, PoolStatus};
use crate::fee::compute_fee;
use crate::vault_standards::events::{LossRealized, YieldHarvested};
use crate::vault_standards::internal::{ext_self, GAS_FOR_FT_TRANSFER, GAS_FOR_POOL_WITHDRAW};
use crate::{Contract, ContractExt};

#[near]
impl Contract {
    /// Permissionless harvest trigger.
    ///
    /// Returns the gross yield staged for collection (`0` immediately when
    /// no pool reports a positive accrual). Losses discovered during the
    /// gather phase are realized even when nothing is staged.
    ///
    /// # Panics
    ///
    /// Panics if the contract is paused or a prior harvest has not settled.
    pub fn harvest(&mut self) -> PromiseOrValue<U128> {
        self.require_not_paused();
        require!(!self.harvest_lock, "Harvest already in progress");

        let now = U64(env::block_timestamp());
        let pool_ids: Vec<u64> = self.pools.iter().map(|(id, _)| *id).collect();
        let mut staged: Vec<PoolSlice> = Vec::new();

        for pool_id in pool_ids {
            let (status, allocated, reported) = {
                let pool = self.pools.get(&pool_id).expect("Pool not registered");
                (pool.status, pool.allocated, pool.reported_balance)
            };
            if status != PoolStatus::Active {
                continue;
            }
            if reported < allocated {
                // Realized loss: snap principal to the reported balance and
                // write the difference down from NAV, explicitly.
                let loss = allocated - reported;
                self.pools
                    .get_mut(&pool_id)
                    .expect("Pool not registered")
                    .allocated = reported;
                self.total_assets = self
                    .total_assets
                    .checked_sub(loss)
                    .expect("total_assets underflow");
                LossRealized {
                    pool_id,
                    amount: U128(loss),
                    timestamp: now,
                }
                .emit();
            } else if reported > allocated {
                staged.push(PoolSlice {
                    pool_id,
                    amount: U128(reported - allocated),
                });
            }
        }

        if staged.is_empty() {
            env::log_str("harvest: no yield to collect");
            return PromiseOrValue::Value(U128(0));
        }

        self.harvest_lock = true;

        let mut recalls: Option<Promise> = None;
        for slice in &staged {
            let account = self
                .pools
                .get(&slice.pool_id)
                .expect("Pool not registered")
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

        PromiseOrValue::Promise(
            recalls.expect("non-empty staging plan").then(
                ext_self::ext(env::current_account_id())
                    .with_static_gas(Gas::from_tgas(40))
                    .settle_harvest(staged),
            ),
        )
    }

    /// Settles a harvest from the recall results. Releases the lock.
    #[private]
    pub fn settle_harvest(&mut self, staged: Vec<PoolSlice>) -> U128 {
        let actuals: Vec<u128> = staged
            .iter()
            .enumerate()
            .map(|(index, slice)| Self::pool_recall_result(index as u64, slice.amount.0))
            .collect();
        U128(self.internal_settle_harvest(staged, actuals))
    }

    /// Rebooks a fee whose transfer to the collector failed: the tokens
    /// never left the vault account, so the fee is folded back into NAV and
    /// removed from the cumulative counter.
    #[private]
    pub fn resolve_fee_transfer(&mut self, amount: U128) {
        if matches!(env::promise_result(0), PromiseResult::Successful(_)) {
            return;
        }
        self.fees_collected = self
            .fees_collected
            .checked_sub(amount.0)
            .expect("fees_collected underflow");
        self.total_assets = self
            .total_assets
            .checked_add(amount.0)
            .expect("total_assets overflow");
        self.float = self.float.checked_add(amount.0).expect("float overflow");
        env::log_str(&format!(
            "fee_transfer_failed amount={} rebooked into NAV",
            amount.0
        ));
    }
}

impl Contract {
    /// Commits a harvest settlement: `actuals[i]` is the authoritative
    /// amount pool `staged[i]` actually returned (0 for failed recalls).
    ///
    /// Principal ledger entries are untouched — only yield was extracted —
    /// but each pool's tracked balance drops by what it paid out, so the
    /// same accrual cannot be counted twice before the next oracle report.
    pub(crate) fn internal_settle_harvest(
        &mut self,
        staged: Vec<PoolSlice>,
        actuals: Vec<u128>,
    ) -> u128 {
        let mut gross: u128 = 0;
        for (slice, actual) in staged.iter().zip(actuals) {
            if actual == 0 {
                env::log_str(&format!(
                    "pool_unavailable id={} op=harvest requested={}",
                    slice.pool_id, slice.amount.0
                ));
                continue;
            }
            let pool = self
                .pools
                .get_mut(&slice.pool_id)
                .expect("Pool not registered");
            pool.reported_balance = pool.reported_balance.saturating_sub(actual);
            gross = gross.checked_add(actual).expect("gross yield overflow");
        }

        if gross == 0 {
            env::log_str("harvest: all recalls failed, nothing settled");
            self.harvest_lock = false;
            return 0;
        }

        let fee = compute_fee(gross, self.aggregate_apy_bps(), &self.fee_config);
        let net = gross - fee;

        self.total_assets = self
            .total_assets
            .checked_add(net)
            .expect("total_assets overflow");
        self.float = self.float.checked_add(net).expect("float overflow");
        self.fees_collected = self
            .fees_collected
            .checked_add(fee)
            .expect("fees_collected overflow");

        if fee > 0 {
            let _ = ext_ft_core::ext(self.asset.clone())
                .with_attached_deposit(NearToken::from_yoctonear(1))
                .with_static_gas(GAS_FOR_FT_TRANSFER)
                .ft_transfer(self.fee_collector.clone(), U128(fee), Some("Harvest fee".into()))
                .then(
                    ext_self::ext(env::current_account_id())
                        .with_static_gas(Gas::from_tgas(10))
                        .resolve_fee_transfer(U128(fee)),
                );
        }

        YieldHarvested {
            total_yield: U128(gross),
            fee: U128(fee),
            timestamp: U64(env::block_timestamp()),
        }
        .emit();

        self.harvest_lock = false;
        gross
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::builders::ContractBuilder;

    #[test]
    fn harvest_with_no_accrual_returns_zero_and_stays_unlocked() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_500, 1_000, 500, 500)
            .total_assets(500)
            .build();

        match contract.harvest() {
            PromiseOrValue::Value(v) => assert_eq!(v.0, 0),
            PromiseOrValue::Promise(_) => panic!("expected immediate settlement"),
        }
        assert!(!contract.harvest_lock);
    }

    #[test]
    fn harvest_stages_accrual_and_holds_lock() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_500, 1_000, 650, 500)
            .total_assets(500)
            .build();

        match contract.harvest() {
            PromiseOrValue::Promise(_) => {}
            PromiseOrValue::Value(_) => panic!("expected a staged recall"),
        }
        assert!(contract.harvest_lock);
        // Principal untouched until settle.
        assert_eq!(contract.pools.get(&1).unwrap().allocated, 500);
        assert_eq!(contract.total_assets, 500);
    }

    #[test]
    #[should_panic(expected = "Harvest already in progress")]
    fn concurrent_harvest_rejected() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_500, 1_000, 650, 500)
            .total_assets(500)
            .build();
        let _ = contract.harvest();
        let _ = contract.harvest();
    }

    #[test]
    fn harvest_realizes_losses_immediately() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_500, 1_000, 400, 500)
            .total_assets(500)
            .build();

        let result = contract.harvest();
        assert!(matches!(result, PromiseOrValue::Value(U128(0))));
        assert_eq!(contract.pools.get(&1).unwrap().allocated, 400);
        assert_eq!(contract.total_assets, 400);
        assert!(!contract.harvest_lock);
    }

    #[test]
    fn loss_in_one_pool_does_not_block_gain_in_another() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_500, 1_000, 400, 500)
            .pool(2, "pool-b.test", 1_200, 1_000, 360, 300)
            .total_assets(800)
            .build();

        let result = contract.harvest();
        assert!(matches!(result, PromiseOrValue::Promise(_)));
        // Loss on A realized during gather.
        assert_eq!(contract.total_assets, 700);
        assert_eq!(contract.pools.get(&1).unwrap().allocated, 400);
        // Gain on B staged, principal untouched.
        assert_eq!(contract.pools.get(&2).unwrap().allocated, 300);
    }

    #[test]
    fn settle_credits_net_yield_and_routes_fee() {
        // 10% base fee at reference signal: gross 150 -> fee 15, net 135.
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_000, 10_000, 1_650, 1_500)
            .total_assets(1_500)
            .build();

        let staged = vec![PoolSlice {
            pool_id: 1,
            amount: U128(150),
        }];
        contract.harvest_lock = true;
        let gross = contract.internal_settle_harvest(staged, vec![150]);

        assert_eq!(gross, 150);
        assert_eq!(contract.total_assets, 1_635);
        assert_eq!(contract.float, 135);
        assert_eq!(contract.fees_collected, 15);
        assert_eq!(contract.pools.get(&1).unwrap().reported_balance, 1_500);
        assert!(!contract.harvest_lock);
    }

    #[test]
    fn settle_treats_partial_recall_as_authoritative() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_000, 10_000, 1_650, 1_500)
            .total_assets(1_500)
            .build();

        let staged = vec![PoolSlice {
            pool_id: 1,
            amount: U128(150),
        }];
        contract.harvest_lock = true;
        let gross = contract.internal_settle_harvest(staged, vec![100]);

        assert_eq!(gross, 100);
        // Un-recalled accrual stays countable against the pool's balance.
        assert_eq!(contract.pools.get(&1).unwrap().reported_balance, 1_550);
        assert!(!contract.harvest_lock);
    }

    #[test]
    fn settle_with_all_recalls_failed_releases_lock() {
        let mut contract = ContractBuilder::new("owner.test", "usdc.test")
            .pool(1, "pool-a.test", 1_000, 10_000, 1_650, 1_500)
            .total_assets(1_500)
            .build();

        let staged = vec![PoolSlice {
            pool_id: 1,
            amount: U128(150),
        }];
        contract.harvest_lock = true;
        assert_eq!(contract.internal_settle_harvest(staged, vec![0]), 0);
        assert_eq!(contract.total_assets, 1_500);
        assert_eq!(contract.fees_collected, 0);
        assert!(!contract.harvest_lock);
    }
}
