//! Postgres store integration tests
//!
//! Require `DATABASE_URL`. Run with: cargo test --test integration_postgres -- --ignored

use std::sync::Arc;

use reserva::auth::Argon2Hasher;
use reserva::cache::MemoryCache;
use reserva::domain::{Amount, Bank, NewAccount, TransferPosting};
use reserva::handlers::{AdjustSupplyCommand, CreateAccountCommand, RegisterBankCommand, TransferCommand};
use reserva::store::{LedgerStore, PgLedgerStore, StoreError};
use reserva::{AppState, EngineSettings, LedgerError, OperationContext};

mod common;

async fn seed_bank(store: &PgLedgerStore, username: &str) {
    store
        .insert_bank(&Bank {
            username: username.into(),
            admin: false,
            password_hash: "unused".into(),
            version: 0,
        })
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_account_cas() {
    let pool = common::setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    seed_bank(&store, "alpha").await;

    let account = store
        .insert_account(&NewAccount::new("alpha", "{}").unwrap())
        .await
        .unwrap();
    assert_eq!(account.version, 1);
    assert_eq!(account.balance_in_cents, 0);

    let mut edit = account.clone();
    edit.frozen = true;
    let updated = store.update_account(&edit, 1).await.unwrap();
    assert_eq!(updated.version, 2);
    assert!(updated.frozen);

    let err = store.update_account(&edit, 1).await.unwrap_err();
    assert!(err.is_edit_conflict());

    let mut missing = edit.clone();
    missing.id = i64::MAX;
    let err = store.update_account(&missing, 2).await.unwrap_err();
    assert!(matches!(err, StoreError::AccountNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_duplicate_bank_username() {
    let pool = common::setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    seed_bank(&store, "alpha").await;

    let err = store
        .insert_bank(&Bank {
            username: "alpha".into(),
            admin: true,
            password_hash: "unused".into(),
            version: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateUsername(_)));
}

#[tokio::test]
#[ignore]
async fn test_stale_posting_is_rejected() {
    let pool = common::setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    seed_bank(&store, "alpha").await;

    let a = store
        .insert_account(&NewAccount::new("alpha", "{}").unwrap())
        .await
        .unwrap();
    let b = store
        .insert_account(&NewAccount::new("alpha", "{}").unwrap())
        .await
        .unwrap();
    store.adjust_supply(a.id, 100, false).await.unwrap();

    // Snapshot taken before the supply change
    let posting = TransferPosting::from_snapshots(&a, &b, Amount::new(10).unwrap());
    let err = store.commit_transfer(&posting).await.unwrap_err();
    assert!(err.is_edit_conflict());

    let a = store.get_account(a.id).await.unwrap();
    let committed = store
        .commit_transfer(&TransferPosting::from_snapshots(&a, &b, Amount::new(10).unwrap()))
        .await
        .unwrap();
    assert_eq!(committed.source.balance_in_cents, 90);
    assert_eq!(committed.target.balance_in_cents, 10);

    let stored = store.get_transfer(committed.transfer.id).await.unwrap();
    assert_eq!(stored, committed.transfer);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_transfers_conserve_money() {
    let pool = common::setup_test_db().await;
    let store = Arc::new(PgLedgerStore::new(pool));
    let cache = Arc::new(MemoryCache::new());
    let settings = EngineSettings {
        transfer_max_attempts: 32,
        ..EngineSettings::default()
    };
    let state = AppState::new(
        store.clone(),
        cache.clone(),
        cache,
        Arc::new(Argon2Hasher::low_cost()),
        settings,
        "test",
    );

    let ctx = OperationContext::new();
    let admin = state
        .banks
        .register_unchecked(RegisterBankCommand::new("central", common::PASSWORD).as_admin(), &ctx)
        .await
        .unwrap()
        .principal();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let account = state
            .accounts
            .create(&admin, CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();
        state
            .accounts
            .adjust_supply(&admin, AdjustSupplyCommand::new(account.id, 1_000), &ctx)
            .await
            .unwrap();
        ids.push(account.id);
    }

    let mut handles = Vec::new();
    for i in 0..40usize {
        let state = state.clone();
        let admin = admin.clone();
        let source = ids[i % ids.len()];
        let target = ids[(i + 1 + i / ids.len()) % ids.len()];
        if source == target {
            continue;
        }
        handles.push(tokio::spawn(async move {
            state
                .transfers
                .execute(&admin, TransferCommand::new(source, target, 150), &OperationContext::new())
                .await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(LedgerError::InsufficientFunds { .. }) | Err(LedgerError::EditConflict) => {}
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    let balances = store.account_balances().await.unwrap();
    assert_eq!(balances.iter().map(|(_, b)| b).sum::<i64>(), 4_000);
    assert!(balances.iter().all(|(_, b)| *b >= 0));
}
