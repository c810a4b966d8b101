//! End-to-end lifecycle scenarios driven through the public contract
//! surface: init, pool registration, oracle reports, deposits, harvest
//! settlement, and redemption. Cross-contract boundaries are simulated by
//! installing promise results before invoking the settle callbacks, the
//! same way the runtime would deliver them.

use std::collections::HashMap;

use near_contract_standards::fungible_token::core::FungibleTokenCore;
use near_contract_standards::fungible_token::receiver::FungibleTokenReceiver;
use near_sdk::json_types::U128;
use near_sdk::test_utils::VMContextBuilder;
use near_sdk::{testing_env, AccountId, NearToken, PromiseOrValue, PromiseResult};

use yield_vault::allocator::PoolSlice;
use yield_vault::vault_standards::VaultCore;
use yield_vault::Contract;

fn account(name: &str) -> AccountId {
    name.parse().unwrap()
}

fn ctx(predecessor: &str, deposit_yocto: u128) {
    testing_env!(VMContextBuilder::new()
        .current_account_id(account("vault.test"))
        .predecessor_account_id(account(predecessor))
        .attached_deposit(NearToken::from_yoctonear(deposit_yocto))
        .build());
}

/// Context for a `#[private]` settle callback: predecessor is the contract
/// itself and the given promise results are visible.
fn ctx_with_results(results: Vec<PromiseResult>) {
    let context = VMContextBuilder::new()
        .current_account_id(account("vault.test"))
        .predecessor_account_id(account("vault.test"))
        .build();
    testing_env!(
        context,
        near_sdk::test_vm_config(),
        near_sdk::RuntimeFeesConfig::test(),
        HashMap::default(),
        results
    );
}

fn recall_result(amount: u128) -> PromiseResult {
    PromiseResult::Successful(serde_json::to_vec(&U128(amount)).unwrap())
}

fn new_vault() -> Contract {
    ctx("owner.test", 0);
    Contract::init(
        account("owner.test"),
        account("usdc.test"),
        account("oracle.test"),
        account("rebalancer.test"),
        account("fees.test"),
        None,
        "yvUSDC".to_string(),
        "Yield Vault USDC".to_string(),
        6,
    )
}

fn deposit(contract: &mut Contract, sender: &str, amount: u128) -> u128 {
    ctx("usdc.test", 0);
    match contract.ft_on_transfer(account(sender), U128(amount), String::new()) {
        PromiseOrValue::Value(unused) => amount - unused.0,
        PromiseOrValue::Promise(_) => panic!("deposit must settle synchronously"),
    }
}

/// Two pools at 10% APY, capacities 600 and 10_000. At the default fee
/// config the market signal equals the reference, so the base 10% rate
/// applies to harvested yield.
fn vault_with_two_pools() -> Contract {
    let mut contract = new_vault();
    ctx("owner.test", 0);
    contract.add_pool(1, account("pool-a.test"), 1_000);
    contract.add_pool(2, account("pool-b.test"), 1_000);
    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(0));
    contract.report_pool(2, 1_000, U128(10_000), U128(0));
    contract
}

#[test]
fn deposit_allocate_harvest_redeem_lifecycle() {
    let mut contract = vault_with_two_pools();

    // First deposit mints 1:1 and spills across the capacity-capped pools.
    let used = deposit(&mut contract, "alice.test", 1_000);
    assert_eq!(used, 1_000);
    assert_eq!(contract.ft_balance_of(account("alice.test")).0, 1_000);
    assert_eq!(contract.get_pool(1).unwrap().allocated.0, 600);
    assert_eq!(contract.get_pool(2).unwrap().allocated.0, 400);
    assert_eq!(contract.get_float().0, 0);

    // Second deposit at unchanged share price.
    deposit(&mut contract, "bob.test", 500);
    assert_eq!(contract.ft_balance_of(account("bob.test")).0, 500);
    assert_eq!(VaultCore::total_assets(&contract).0, 1_500);
    assert_eq!(contract.convert_to_assets(U128(1_000)).0, 1_000);

    // Yield accrues: pool balances rise above allocated principal.
    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(690));
    contract.report_pool(2, 1_000, U128(10_000), U128(960));

    ctx("harvester.test", 0);
    let staged = match contract.harvest() {
        PromiseOrValue::Promise(_) => vec![
            PoolSlice {
                pool_id: 1,
                amount: U128(90),
            },
            PoolSlice {
                pool_id: 2,
                amount: U128(60),
            },
        ],
        PromiseOrValue::Value(_) => panic!("accrued yield must stage a collection round"),
    };
    assert!(contract.is_harvest_in_progress());

    // Both recalls land in full: 150 gross, 10% fee, 135 credited to NAV.
    ctx_with_results(vec![recall_result(90), recall_result(60)]);
    let gross = contract.settle_harvest(staged);
    assert_eq!(gross.0, 150);
    assert!(!contract.is_harvest_in_progress());
    assert_eq!(VaultCore::total_assets(&contract).0, 1_635);
    assert_eq!(contract.get_fees_collected().0, 15);
    assert_eq!(contract.get_float().0, 135);

    // Share price rose from 1.0 to 1.09; supply is unchanged.
    assert_eq!(contract.ft_total_supply().0, 1_500);
    assert_eq!(contract.convert_to_assets(U128(500)).0, 545);

    // Alice redeems 500 shares at the post-harvest price.
    ctx("alice.test", 1);
    let assets = contract.preview_redeem(U128(500)).0;
    assert_eq!(assets, 545);
    let _ = contract.redeem(U128(500), None, None);
    assert_eq!(contract.ft_balance_of(account("alice.test")).0, 500);
    assert_eq!(VaultCore::total_assets(&contract).0, 1_090);

    // Float covered 135; the rest came out of the lowest-id 10% pool.
    ctx_with_results(vec![recall_result(410)]);
    let settled = contract.settle_redeem(
        account("alice.test"),
        account("alice.test"),
        U128(500),
        U128(545),
        U128(135),
        vec![PoolSlice {
            pool_id: 1,
            amount: U128(410),
        }],
        None,
    );
    assert!(matches!(settled, PromiseOrValue::Promise(_)));

    // Ledger stays conserved after the full cycle.
    let allocated: u128 = contract
        .get_pools()
        .iter()
        .map(|p| p.allocated.0)
        .sum();
    assert_eq!(
        VaultCore::total_assets(&contract).0,
        contract.get_float().0 + allocated
    );
}

#[test]
fn harvest_realizes_losses_for_all_holders() {
    let mut contract = vault_with_two_pools();
    deposit(&mut contract, "alice.test", 1_000);

    // Pool 1 lost 100 of its 600 principal.
    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(500));

    ctx("harvester.test", 0);
    let result = contract.harvest();
    // Nothing staged; the loss is written down synchronously.
    assert!(matches!(result, PromiseOrValue::Value(U128(0))));
    assert!(!contract.is_harvest_in_progress());
    assert_eq!(VaultCore::total_assets(&contract).0, 900);
    assert_eq!(contract.get_pool(1).unwrap().allocated.0, 500);

    // Share price dropped for every holder; no shares were touched.
    assert_eq!(contract.ft_total_supply().0, 1_000);
    assert_eq!(contract.convert_to_assets(U128(1_000)).0, 900);
}

#[test]
#[should_panic(expected = "Harvest already in progress")]
fn deposits_rejected_while_harvest_settles() {
    let mut contract = vault_with_two_pools();
    deposit(&mut contract, "alice.test", 1_000);

    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(690));
    ctx("harvester.test", 0);
    let _ = contract.harvest();
    assert!(contract.is_harvest_in_progress());

    deposit(&mut contract, "bob.test", 500);
}

#[test]
fn rounding_never_creates_value_for_a_round_trip() {
    let mut contract = vault_with_two_pools();
    deposit(&mut contract, "alice.test", 1_000);

    // Push the share price off 1:1 with accrued yield.
    ctx("oracle.test", 0);
    contract.report_pool(2, 1_000, U128(10_000), U128(523));
    ctx("harvester.test", 0);
    let _ = contract.harvest();
    ctx_with_results(vec![recall_result(123)]);
    contract.settle_harvest(vec![PoolSlice {
        pool_id: 2,
        amount: U128(123),
    }]);

    for amount in [1u128, 7, 99, 1_000, 12_345] {
        let used = deposit(&mut contract, "bob.test", amount);
        assert!(used <= amount);
        let shares = contract.preview_deposit(U128(used));
        let back = contract.preview_redeem(shares);
        assert!(
            back.0 <= amount,
            "round trip of {} returned {}",
            amount,
            back.0
        );
    }
}

#[test]
fn failed_fee_transfer_rebooks_the_fee_into_nav() {
    let mut contract = vault_with_two_pools();
    deposit(&mut contract, "alice.test", 1_000);

    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(690));
    ctx("harvester.test", 0);
    let _ = contract.harvest();

    // 90 gross at the base 10% rate: fee 9, net 81 credited.
    ctx_with_results(vec![recall_result(90)]);
    contract.settle_harvest(vec![PoolSlice {
        pool_id: 1,
        amount: U128(90),
    }]);
    assert_eq!(contract.get_fees_collected().0, 9);
    assert_eq!(VaultCore::total_assets(&contract).0, 1_081);

    // The collector transfer fails: the tokens never left, so the counter
    // reverts and the fee becomes NAV for the holders.
    ctx_with_results(vec![PromiseResult::Failed]);
    contract.resolve_fee_transfer(U128(9));
    assert_eq!(contract.get_fees_collected().0, 0);
    assert_eq!(VaultCore::total_assets(&contract).0, 1_090);
    assert_eq!(contract.get_float().0, 90);

    let allocated: u128 = contract.get_pools().iter().map(|p| p.allocated.0).sum();
    assert_eq!(
        VaultCore::total_assets(&contract).0,
        contract.get_float().0 + allocated
    );
}

#[test]
fn failed_recalls_settle_to_zero_and_release_the_lock() {
    let mut contract = vault_with_two_pools();
    deposit(&mut contract, "alice.test", 1_000);

    ctx("oracle.test", 0);
    contract.report_pool(1, 1_000, U128(600), U128(690));
    ctx("harvester.test", 0);
    let _ = contract.harvest();

    ctx_with_results(vec![PromiseResult::Failed]);
    let gross = contract.settle_harvest(vec![PoolSlice {
        pool_id: 1,
        amount: U128(90),
    }]);
    assert_eq!(gross.0, 0);
    assert!(!contract.is_harvest_in_progress());
    assert_eq!(VaultCore::total_assets(&contract).0, 1_000);
}
