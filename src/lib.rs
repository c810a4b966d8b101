//! # Yield Vault
//!
//! A multi-pool yield aggregation vault on NEAR. Depositors receive NEP-141
//! shares priced by NAV; principal is spread across registered yield pools
//! by APY rank under per-pool capacity limits; harvests skim accrued yield,
//! take a market-scaled performance fee, and fold the net back into NAV.
//!
//! Pool APY, capacity, and balances are pushed into contract state by an
//! authorized oracle account, so planning runs synchronously against the
//! internal ledger. Token settlement happens through cross-contract calls
//! whose callbacks reconcile the ledger against what actually moved.

use near_contract_standards::fungible_token::metadata::{FungibleTokenMetadata, FT_METADATA_SPEC};
use near_contract_standards::fungible_token::FungibleToken;
use near_sdk::borsh::BorshSerialize;
use near_sdk::store::IterableMap;
use near_sdk::{env, near, require, AccountId, BorshStorageKey, PanicOnDefault};

pub mod allocator;
pub mod fee;
pub mod harvest;
pub mod vault;
pub mod vault_standards;

#[cfg(test)]
pub mod test_utils;

use allocator::Pool;
use fee::FeeConfig;

#[derive(BorshSerialize, BorshStorageKey)]
#[borsh(crate = "near_sdk::borsh")]
enum StorageKey {
    FungibleToken,
    Pools,
}

#[near(contract_state)]
#[derive(PanicOnDefault)]
pub struct Contract {
    owner_id: AccountId,
    is_paused: bool,
    /// Account allowed to push pool state via `report_pool`.
    oracle_id: AccountId,
    /// Account allowed to trigger `rebalance`.
    rebalancer_id: AccountId,
    /// Receives performance fees in the underlying asset.
    fee_collector: AccountId,
    /// Destination for governance share conversions, if configured.
    governance_bridge: Option<AccountId>,

    /// NEP-141 ledger for the vault shares.
    pub(crate) token: FungibleToken,
    metadata: FungibleTokenMetadata,

    /// Underlying asset contract the vault accepts and pays out.
    pub(crate) asset: AccountId,
    /// NAV in underlying units. Always equals `float` plus the sum of pool
    /// allocations.
    pub(crate) total_assets: u128,
    /// Underlying held at the vault account, not deployed to any pool.
    pub(crate) float: u128,
    /// Set while a harvest collection round is in flight; blocks deposits,
    /// withdrawals, rebalances, and further harvests.
    pub(crate) harvest_lock: bool,
    /// Lifetime performance fees taken, for reporting.
    pub(crate) fees_collected: u128,
    pub(crate) fee_config: FeeConfig,

    pub(crate) pools: IterableMap<u64, Pool>,
}

#[near]
impl Contract {
    #[init]
    pub fn init(
        owner_id: AccountId,
        asset_id: AccountId,
        oracle_id: AccountId,
        rebalancer_id: AccountId,
        fee_collector: AccountId,
        fee_config: Option<FeeConfig>,
        share_symbol: String,
        share_name: String,
        decimals: u8,
    ) -> Self {
        let fee_config = fee_config.unwrap_or_default();
        fee_config.assert_valid();

        Self {
            owner_id,
            is_paused: false,
            oracle_id,
            rebalancer_id,
            fee_collector,
            governance_bridge: None,
            token: FungibleToken::new(StorageKey::FungibleToken),
            metadata: FungibleTokenMetadata {
                spec: FT_METADATA_SPEC.to_string(),
                name: share_name,
                symbol: share_symbol,
                icon: None,
                reference: None,
                reference_hash: None,
                decimals,
            },
            asset: asset_id,
            total_assets: 0,
            float: 0,
            harvest_lock: false,
            fees_collected: 0,
            fee_config,
            pools: IterableMap::new(StorageKey::Pools),
        }
    }

    // ===== Owner surface =====

    pub fn pause(&mut self) {
        self.require_owner();
        self.is_paused = true;
        env::log_str("Contract paused");
    }

    pub fn unpause(&mut self) {
        self.require_owner();
        self.is_paused = false;
        env::log_str("Contract unpaused");
    }

    pub fn set_fee_config(&mut self, fee_config: FeeConfig) {
        self.require_owner();
        fee_config.assert_valid();
        self.fee_config = fee_config;
    }

    pub fn set_oracle(&mut self, oracle_id: AccountId) {
        self.require_owner();
        self.oracle_id = oracle_id;
    }

    pub fn set_rebalancer(&mut self, rebalancer_id: AccountId) {
        self.require_owner();
        self.rebalancer_id = rebalancer_id;
    }

    pub fn set_fee_collector(&mut self, fee_collector: AccountId) {
        self.require_owner();
        self.fee_collector = fee_collector;
    }

    pub fn set_governance_bridge(&mut self, bridge_id: AccountId) {
        self.require_owner();
        self.governance_bridge = Some(bridge_id);
    }

    // ===== Views =====

    pub fn get_owner(&self) -> AccountId {
        self.owner_id.clone()
    }

    pub fn get_oracle(&self) -> AccountId {
        self.oracle_id.clone()
    }

    pub fn get_rebalancer(&self) -> AccountId {
        self.rebalancer_id.clone()
    }

    pub fn get_fee_collector(&self) -> AccountId {
        self.fee_collector.clone()
    }

    pub fn get_governance_bridge(&self) -> Option<AccountId> {
        self.governance_bridge.clone()
    }

    pub fn get_fee_config(&self) -> FeeConfig {
        self.fee_config.clone()
    }

    pub fn get_float(&self) -> near_sdk::json_types::U128 {
        near_sdk::json_types::U128(self.float)
    }

    pub fn get_fees_collected(&self) -> near_sdk::json_types::U128 {
        near_sdk::json_types::U128(self.fees_collected)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_harvest_in_progress(&self) -> bool {
        self.harvest_lock
    }
}

impl Contract {
    pub(crate) fn require_owner(&self) {
        require!(
            env::predecessor_account_id() == self.owner_id,
            "Only the owner can call this method"
        );
    }

    pub(crate) fn require_oracle(&self) {
        require!(
            env::predecessor_account_id() == self.oracle_id,
            "Only the oracle can call this method"
        );
    }

    pub(crate) fn require_rebalancer(&self) {
        require!(
            env::predecessor_account_id() == self.rebalancer_id,
            "Only the rebalancer can call this method"
        );
    }

    pub(crate) fn require_not_paused(&self) {
        require!(!self.is_paused, "Contract is paused");
    }

    pub(crate) fn require_no_harvest_in_progress(&self) {
        require!(!self.harvest_lock, "Harvest already in progress");
    }
}
