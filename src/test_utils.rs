//! Shared unit-test scaffolding: context helpers and a fluent contract
//! builder for assembling ledger states directly, without replaying the
//! oracle reports and deposits that would produce them on-chain.

pub mod helpers {
    use near_sdk::test_utils::VMContextBuilder;
    use near_sdk::{testing_env, NearToken};

    /// Installs a test context with the given predecessor and attached
    /// deposit (in yoctoNEAR). The contract account is `vault.test`.
    pub fn init_ctx(predecessor: &str, deposit_yocto: u128) {
        testing_env!(VMContextBuilder::new()
            .current_account_id("vault.test".parse().unwrap())
            .predecessor_account_id(predecessor.parse().unwrap())
            .attached_deposit(NearToken::from_yoctonear(deposit_yocto))
            .build());
    }
}

pub mod builders {
    use super::helpers::init_ctx;
    use crate::allocator::{Pool, PoolStatus};
    use crate::Contract;
    use near_sdk::AccountId;

    /// Builds a [`Contract`] in an arbitrary ledger state.
    ///
    /// Pools are inserted directly with the given capacity, reported
    /// balance, and allocation; `total_assets` and `float` are set verbatim,
    /// so the builder caller is responsible for keeping
    /// `total_assets == float + sum(allocated)` where a test relies on it.
    ///
    /// The oracle is `oracle.test`, the rebalancer `rebalancer.test`, and
    /// the fee collector `fees.test`. After `build` the active context has
    /// the configured predecessor (the owner by default).
    pub struct ContractBuilder {
        owner: AccountId,
        asset: AccountId,
        pools: Vec<(u64, Pool)>,
        total_assets: u128,
        float: u128,
        supplies: Vec<(AccountId, u128)>,
        predecessor: String,
        attached: u128,
    }

    impl ContractBuilder {
        pub fn new(owner: &str, asset: &str) -> Self {
            Self {
                owner: owner.parse().unwrap(),
                asset: asset.parse().unwrap(),
                pools: Vec::new(),
                total_assets: 0,
                float: 0,
                supplies: Vec::new(),
                predecessor: owner.to_string(),
                attached: 0,
            }
        }

        pub fn pool(
            mut self,
            pool_id: u64,
            account: &str,
            apy_bps: u32,
            capacity: u128,
            reported_balance: u128,
            allocated: u128,
        ) -> Self {
            self.pools.push((
                pool_id,
                Pool {
                    account_id: account.parse().unwrap(),
                    status: PoolStatus::Active,
                    apy_bps,
                    capacity,
                    reported_balance,
                    allocated,
                },
            ));
            self
        }

        pub fn total_assets(mut self, total_assets: u128) -> Self {
            self.total_assets = total_assets;
            self
        }

        pub fn float(mut self, float: u128) -> Self {
            self.float = float;
            self
        }

        /// Registers `account` and mints it `shares` vault shares.
        pub fn supply_to(mut self, account: &str, shares: u128) -> Self {
            self.supplies.push((account.parse().unwrap(), shares));
            self
        }

        pub fn predecessor(mut self, predecessor: &str) -> Self {
            self.predecessor = predecessor.to_string();
            self
        }

        pub fn attached(mut self, deposit_yocto: u128) -> Self {
            self.attached = deposit_yocto;
            self
        }

        pub fn build(self) -> Contract {
            init_ctx(self.owner.as_str(), 0);
            let mut contract = Contract::init(
                self.owner.clone(),
                self.asset,
                "oracle.test".parse().unwrap(),
                "rebalancer.test".parse().unwrap(),
                "fees.test".parse().unwrap(),
                None,
                "yvUSDC".to_string(),
                "Yield Vault USDC".to_string(),
                6,
            );

            for (pool_id, pool) in self.pools {
                contract.pools.insert(pool_id, pool);
            }
            for (account, shares) in self.supplies {
                contract.token.internal_register_account(&account);
                contract.token.internal_deposit(&account, shares);
            }
            contract.total_assets = self.total_assets;
            contract.float = self.float;

            init_ctx(&self.predecessor, self.attached);
            contract
        }
    }
}
