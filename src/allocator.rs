//! # Allocator
//!
//! Pool registry and the capital allocation engine. Deposited principal is
//! placed into external yield pools ranked by reported APY (highest first,
//! capacity-capped, deterministic tie-break on lowest pool id); withdrawals
//! source liquidity in the inverse order so the best-performing positions
//! are disturbed last.
//!
//! ## Pool boundary
//!
//! Pools are external accounts. Depositing is an `ft_transfer_call` of the
//! underlying asset; recalling is a `pool_withdraw` cross-contract call
//! whose returned amount is authoritative. Per-pool APY, capacity, and
//! current balance are pushed into the registry by the configured oracle
//! account via [`Contract::report_pool`] — the allocation engine itself
//! never fetches external data.
//!
//! ## Ledger discipline
//!
//! At every settlement point `total_assets == float + sum(allocated)`.
//! Vault-initiated transfers commit their ledger slice up front and revert
//! it in a resolve callback on failure; pool recalls during rebalance and
//! removal touch the ledger only once the observed outcome is known.

use near_contract_standards::fungible_token::core::ext_ft_core;
use near_sdk::{
    env, ext_contract, json_types::U128, near, require, AccountId, Gas, NearToken, PromiseResult,
};

use crate::vault_standards::events::PoolRebalanced;
use crate::vault_standards::internal::{ext_self, GAS_FOR_POOL_WITHDRAW};
use crate::{Contract, ContractExt};

/// Reported APY above this is treated as corrupt oracle data and rejected.
pub const MAX_SANE_APY_BPS: u32 = 50_000;

/// Gas for the `ft_transfer_call` that places assets into a pool (covers
/// the pool's `ft_on_transfer` plus the token's resolver).
const GAS_FOR_POOL_DEPOSIT: Gas = Gas::from_tgas(50);

/// External interface each yield pool exposes.
///
/// `pool_withdraw` transfers up to `amount` of the underlying asset back to
/// the vault and returns the amount actually withdrawn; partial fulfillment
/// is expected and authoritative.
#[ext_contract(ext_pool)]
pub trait PoolAdapter {
    fn pool_withdraw(&mut self, amount: U128) -> U128;
}

/// Registry status of a pool.
#[near(serializers = [json, borsh])]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PoolStatus {
    /// Eligible for deploys and withdrawals.
    Active,
    /// Holds its allocation but receives no new capital and is skipped
    /// when sourcing withdrawals.
    Paused,
}

/// A registered yield pool.
#[near(serializers = [borsh])]
#[derive(Clone)]
pub struct Pool {
    /// The pool's contract account.
    pub account_id: AccountId,
    pub status: PoolStatus,
    /// Annualized yield in basis points, oracle-reported.
    pub apy_bps: u32,
    /// Maximum principal the pool accepts, oracle-reported.
    pub capacity: u128,
    /// The pool's current balance as last reported by the oracle,
    /// adjusted for transfers this contract has initiated since.
    pub reported_balance: u128,
    /// Principal this vault has placed into the pool.
    pub allocated: u128,
}

/// Read-only view of a registry entry.
#[near(serializers = [json])]
#[derive(Clone, Debug)]
pub struct PoolView {
    pub pool_id: u64,
    pub account_id: AccountId,
    pub status: PoolStatus,
    pub apy_bps: u32,
    pub capacity: U128,
    pub reported_balance: U128,
    pub allocated: U128,
}

/// One (pool, amount) leg of a deploy/withdrawal/harvest plan. Carried
/// through settle callbacks, so JSON-serializable.
#[near(serializers = [json])]
#[derive(Clone, Debug)]
pub struct PoolSlice {
    pub pool_id: u64,
    pub amount: U128,
}

/// Liquidity sourcing plan for a withdrawal: how much comes out of the
/// undeployed float and which pool slices cover the rest.
#[derive(Clone, Debug, Default)]
pub struct WithdrawalPlan {
    pub float_part: u128,
    pub slices: Vec<PoolSlice>,
}

// ============================================================================
// Registry administration & oracle boundary
// ============================================================================

#[near]
impl Contract {
    /// Registers a pool with zero allocated principal.
    ///
    /// Capacity starts at zero, so no capital is deployed until the oracle
    /// has reported for the pool at least once.
    ///
    /// # Panics
    ///
    /// Panics if the caller is not the owner, the pool id is already
    /// registered, or the APY is out of sane bounds.
    pub fn add_pool(&mut self, pool_id: u64, account_id: AccountId, apy_bps: u32) {
        self.require_not_paused();
        self.require_owner();
        require!(
            !self.pools.contains_key(&pool_id),
            "Pool already registered"
        );
        require!(apy_bps <= MAX_SANE_APY_BPS, "APY out of sane bounds");

        self.pools.insert(
            pool_id,
            Pool {
                account_id,
                status: PoolStatus::Active,
                apy_bps,
                capacity: 0,
                reported_balance: 0,
                allocated: 0,
            },
        );
    }

    /// Pauses a pool: existing allocation stays but no new deploys and no
    /// withdrawal sourcing until resumed.
    pub fn pause_pool(&mut self, pool_id: u64) {
        self.require_owner();
        let pool = self.pools.get_mut(&pool_id).expect("Pool not registered");
        pool.status = PoolStatus::Paused;
    }

    /// Resumes a paused pool.
    pub fn resume_pool(&mut self, pool_id: u64) {
        self.require_owner();
        let pool = self.pools.get_mut(&pool_id).expect("Pool not registered");
        pool.status = PoolStatus::Active;
    }

    /// Removes a pool from the registry.
    ///
    /// If the pool still holds principal, a full recall is triggered first
    /// and the entry is only deleted once the recall lands in
    /// [`Contract::resolve_remove_pool`]; until then the pool is paused.
    pub fn remove_pool(&mut self, pool_id: u64) {
        self.require_not_paused();
        self.require_owner();
        self.require_no_harvest_in_progress();

        let (allocated, account) = {
            let pool = self.pools.get(&pool_id).expect("Pool not registered");
            (pool.allocated, pool.account_id.clone())
        };
        if allocated == 0 {
            self.pools.remove(&pool_id);
            env::log_str(&format!("pool_removed id={}", pool_id));
            return;
        }

        self.pools
            .get_mut(&pool_id)
            .expect("Pool not registered")
            .status = PoolStatus::Paused;
        let _ = ext_pool::ext(account)
            .with_static_gas(GAS_FOR_POOL_WITHDRAW)
            .pool_withdraw(U128(allocated))
            .then(
                ext_self::ext(env::current_account_id())
                    .with_static_gas(Gas::from_tgas(10))
                    .resolve_remove_pool(pool_id, U128(allocated)),
            );
    }

    /// Oracle push: updates a pool's APY, capacity, and current balance.
    ///
    /// This is the YieldOracle boundary. Values are defensively bounded
    /// before they can influence ranking; freshness is the oracle's
    /// responsibility.
    ///
    /// Reports are rejected while a harvest collection round is in flight:
    /// the settle callback subtracts recalled amounts from
    /// `reported_balance`, and a report landing inside that window would be
    /// double-counted as a loss on the next harvest.
    ///
    /// # Panics
    ///
    /// Panics if the caller is not the configured oracle account, the pool
    /// is unknown, the APY is absurd, or a harvest is in progress.
    pub fn report_pool(&mut self, pool_id: u64, apy_bps: u32, capacity: U128, balance: U128) {
        self.require_oracle();
        self.require_no_harvest_in_progress();
        require!(apy_bps <= MAX_SANE_APY_BPS, "APY out of sane bounds");

        let pool = self.pools.get_mut(&pool_id).expect("Pool not registered");
        pool.apy_bps = apy_bps;
        pool.capacity = capacity.0;
        pool.reported_balance = balance.0;
    }

    // ==================== View Methods ====================

    /// All registered pools, ordered by pool id.
    pub fn get_pools(&self) -> Vec<PoolView> {
        let mut views: Vec<PoolView> = self
            .pools
            .iter()
            .map(|(pool_id, pool)| Self::pool_view(*pool_id, pool))
            .collect();
        views.sort_by_key(|v| v.pool_id);
        views
    }

    /// A single registry entry, if registered.
    pub fn get_pool(&self, pool_id: u64) -> Option<PoolView> {
        self.pools
            .get(&pool_id)
            .map(|pool| Self::pool_view(pool_id, pool))
    }
}

// ============================================================================
// Allocation engine
// ============================================================================

impl Contract {
    fn pool_view(pool_id: u64, pool: &Pool) -> PoolView {
        PoolView {
            pool_id,
            account_id: pool.account_id.clone(),
            status: pool.status,
            apy_bps: pool.apy_bps,
            capacity: U128(pool.capacity),
            reported_balance: U128(pool.reported_balance),
            allocated: U128(pool.allocated),
        }
    }

    /// Active pools ranked for deploys: APY descending, lowest id first on
    /// ties.
    fn active_pools_apy_desc(&self) -> Vec<(u64, Pool)> {
        let mut pools: Vec<(u64, Pool)> = self
            .pools
            .iter()
            .filter(|(_, p)| p.status == PoolStatus::Active)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        pools.sort_by(|(a_id, a), (b_id, b)| b.apy_bps.cmp(&a.apy_bps).then(a_id.cmp(b_id)));
        pools
    }

    /// Active pools ranked for withdrawals: APY ascending, lowest id first
    /// on ties.
    fn active_pools_apy_asc(&self) -> Vec<(u64, Pool)> {
        let mut pools: Vec<(u64, Pool)> = self
            .pools
            .iter()
            .filter(|(_, p)| p.status == PoolStatus::Active)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        pools.sort_by(|(a_id, a), (b_id, b)| a.apy_bps.cmp(&b.apy_bps).then(a_id.cmp(b_id)));
        pools
    }

    /// Greedy deploy plan: fill the highest-APY pool up to its capacity
    /// headroom, spill to the next. Anything unplaceable is left out of the
    /// plan and stays in the float.
    pub(crate) fn plan_deploy(&self, amount: u128) -> Vec<PoolSlice> {
        let mut remaining = amount;
        let mut plan = Vec::new();
        for (pool_id, pool) in self.active_pools_apy_desc() {
            if remaining == 0 {
                break;
            }
            let headroom = pool.capacity.saturating_sub(pool.allocated);
            let take = headroom.min(remaining);
            if take > 0 {
                plan.push(PoolSlice {
                    pool_id,
                    amount: U128(take),
                });
                remaining -= take;
            }
        }
        plan
    }

    /// Commits a deploy plan for `amount` out of the float and ships the
    /// asset to each planned pool.
    ///
    /// The ledger slice is committed before the transfer; a failed or
    /// partially-used `ft_transfer_call` is reverted in
    /// [`Contract::resolve_deploy`] from the token's authoritative
    /// used-amount result.
    pub(crate) fn execute_deploy(&mut self, amount: u128) -> Vec<PoolSlice> {
        let plan = self.plan_deploy(amount.min(self.float));
        for slice in &plan {
            let pool = self
                .pools
                .get_mut(&slice.pool_id)
                .expect("Pool missing from plan");
            pool.allocated = pool
                .allocated
                .checked_add(slice.amount.0)
                .expect("allocation overflow");
            pool.reported_balance = pool
                .reported_balance
                .checked_add(slice.amount.0)
                .expect("reported balance overflow");
            self.float = self
                .float
                .checked_sub(slice.amount.0)
                .expect("float underflow");

            let account = self
                .pools
                .get(&slice.pool_id)
                .expect("Pool missing from plan")
                .account_id
                .clone();
            let _ = ext_ft_core::ext(self.asset.clone())
                .with_attached_deposit(NearToken::from_yoctonear(1))
                .with_static_gas(GAS_FOR_POOL_DEPOSIT)
                .ft_transfer_call(account, slice.amount, None, "deposit".to_string())
                .then(
                    ext_self::ext(env::current_account_id())
                        .with_static_gas(Gas::from_tgas(10))
                        .resolve_deploy(slice.pool_id, slice.amount),
                );
        }
        plan
    }

    /// Plans liquidity sourcing for a withdrawal of `amount`: float first,
    /// then the lowest-APY active pools. Each pool contributes at most
    /// `min(allocated, reported_balance)`.
    ///
    /// # Panics
    ///
    /// Panics with `Insufficient liquidity` if the float and all active
    /// pools together cannot cover `amount` — callers rely on this running
    /// before any state mutation, so the whole operation aborts cleanly.
    pub(crate) fn plan_withdrawal(&self, amount: u128) -> WithdrawalPlan {
        let float_part = self.float.min(amount);
        let mut remaining = amount - float_part;
        let mut slices = Vec::new();

        for (pool_id, pool) in self.active_pools_apy_asc() {
            if remaining == 0 {
                break;
            }
            let available = pool.allocated.min(pool.reported_balance);
            let take = available.min(remaining);
            if take > 0 {
                slices.push(PoolSlice {
                    pool_id,
                    amount: U128(take),
                });
                remaining -= take;
            }
        }

        if remaining > 0 {
            env::panic_str("Insufficient liquidity");
        }

        WithdrawalPlan { float_part, slices }
    }

    /// Target allocation per active pool for the given deployable total,
    /// derived from the current APY ranking.
    pub(crate) fn compute_targets(&self, deployable: u128) -> Vec<(u64, u128)> {
        let mut remaining = deployable;
        let mut targets = Vec::new();
        for (pool_id, pool) in self.active_pools_apy_desc() {
            let target = pool.capacity.min(remaining);
            remaining -= target;
            targets.push((pool_id, target));
        }
        targets
    }

    /// Aggregate APY of deployed capital, weighted by allocation. This is
    /// the market signal handed to the fee policy.
    pub(crate) fn aggregate_apy_bps(&self) -> u32 {
        let mut weighted: u128 = 0;
        let mut total: u128 = 0;
        for (_, pool) in self.pools.iter() {
            if pool.status == PoolStatus::Active {
                weighted += pool.apy_bps as u128 * pool.allocated;
                total += pool.allocated;
            }
        }
        if total == 0 {
            return 0;
        }
        (weighted / total) as u32
    }

    /// Commits an observed recall outcome into the ledger: moves `actual`
    /// from the pool's allocation back into the float.
    pub(crate) fn internal_commit_recall(&mut self, pool_id: u64, actual: u128) {
        if actual == 0 {
            return;
        }
        let pool = self.pools.get_mut(&pool_id).expect("Pool not registered");
        pool.allocated = pool
            .allocated
            .checked_sub(actual)
            .expect("allocation underflow");
        pool.reported_balance = pool.reported_balance.saturating_sub(actual);
        self.float = self.float.checked_add(actual).expect("float overflow");
    }

    /// Reads the `pool_withdraw` result at `index`, capped at `requested`.
    /// A failed promise or unparseable result counts as zero.
    pub(crate) fn pool_recall_result(index: u64, requested: u128) -> u128 {
        match env::promise_result(index) {
            PromiseResult::Successful(bytes) => serde_json::from_slice::<U128>(&bytes)
                .map(|v| v.0)
                .unwrap_or(0)
                .min(requested),
            _ => 0,
        }
    }
}

// ============================================================================
// Rebalancing
// ============================================================================

#[near]
impl Contract {
    /// Moves capital towards the allocation targets implied by the current
    /// APY ranking.
    ///
    /// Over-allocated pools are recalled towards their targets; the ledger
    /// effect of each recall is committed individually in
    /// [`Contract::resolve_rebalance_recall`] once its outcome is known, so
    /// a failed move never leaves the ledger inconsistent — it just leaves
    /// the remaining imbalance for the next pass. The current float is then
    /// re-deployed through the standard deploy pass.
    ///
    /// # Panics
    ///
    /// Panics if the caller is not the configured rebalancer, the contract
    /// is paused, or a harvest is in progress.
    pub fn rebalance(&mut self) {
        self.require_not_paused();
        self.require_rebalancer();
        self.require_no_harvest_in_progress();

        let deployable = self.float
            + self
                .pools
                .iter()
                .filter(|(_, p)| p.status == PoolStatus::Active)
                .map(|(_, p)| p.allocated)
                .sum::<u128>();

        for (pool_id, target) in self.compute_targets(deployable) {
            let pool = self.pools.get(&pool_id).expect("Pool not registered");
            if pool.allocated <= target {
                continue;
            }
            // Recall only what the pool can actually give back.
            let excess = (pool.allocated - target).min(pool.reported_balance);
            if excess == 0 {
                continue;
            }
            let _ = ext_pool::ext(pool.account_id.clone())
                .with_static_gas(GAS_FOR_POOL_WITHDRAW)
                .pool_withdraw(U128(excess))
                .then(
                    ext_self::ext(env::current_account_id())
                        .with_static_gas(Gas::from_tgas(10))
                        .resolve_rebalance_recall(pool_id, U128(excess)),
                );
        }

        let deployed = self.execute_deploy(self.float);
        for slice in deployed {
            PoolRebalanced {
                pool_id: slice.pool_id,
                amount: slice.amount,
                direction: "deploy",
            }
            .emit();
        }
    }

    /// Reverts a deploy slice whose transfer failed or was only partially
    /// accepted by the pool. The token resolver's used-amount result is
    /// authoritative.
    #[private]
    pub fn resolve_deploy(&mut self, pool_id: u64, amount: U128) {
        let used = match env::promise_result(0) {
            PromiseResult::Successful(bytes) => serde_json::from_slice::<U128>(&bytes)
                .map(|v| v.0)
                .unwrap_or(0)
                .min(amount.0),
            _ => 0,
        };
        let refund = amount.0 - used;
        if refund > 0 {
            let pool = self.pools.get_mut(&pool_id).expect("Pool not registered");
            pool.allocated = pool
                .allocated
                .checked_sub(refund)
                .expect("allocation underflow");
            pool.reported_balance = pool.reported_balance.saturating_sub(refund);
            self.float = self.float.checked_add(refund).expect("float overflow");
            env::log_str(&format!(
                "pool_unavailable id={} op=deploy refunded={}",
                pool_id, refund
            ));
        }
    }

    /// Commits a rebalance recall from its observed outcome.
    #[private]
    pub fn resolve_rebalance_recall(&mut self, pool_id: u64, requested: U128) {
        let actual = Self::pool_recall_result(0, requested.0);
        if actual == 0 {
            env::log_str(&format!(
                "pool_unavailable id={} op=rebalance_recall requested={}",
                pool_id, requested.0
            ));
            return;
        }
        self.internal_commit_recall(pool_id, actual);
        PoolRebalanced {
            pool_id,
            amount: U128(actual),
            direction: "recall",
        }
        .emit();
    }

    /// Finishes a pool removal once its full recall has landed. If the
    /// recall was partial, the pool stays registered (paused) with the
    /// remainder still allocated.
    #[private]
    pub fn resolve_remove_pool(&mut self, pool_id: u64, requested: U128) {
        let actual = Self::pool_recall_result(0, requested.0);
        self.internal_commit_recall(pool_id, actual);

        let remaining = self
            .pools
            .get(&pool_id)
            .expect("Pool not registered")
            .allocated;
        if remaining == 0 {
            self.pools.remove(&pool_id);
            env::log_str(&format!("pool_removed id={}", pool_id));
        } else {
            env::log_str(&format!(
                "pool_removal_incomplete id={} remaining={}",
                pool_id, remaining
            ));
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
