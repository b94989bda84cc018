//! Read path behaviour against a scripted store on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use sheetline_core::{ProgrammerError, RemoteError, SheetlineError};
use sheetline_storage::{
    order_by_field, DatasetCatalog, DatasetRecipe, EntryState, InvalidationMap, RemoteStore,
    SheetAccess,
};
use sheetline_test_utils::assertions::{assert_field_values, assert_positions};
use sheetline_test_utils::fixtures::{backend_error, crm_store, exact_retry, key, rate_limited};
use sheetline_test_utils::ScriptedStore;
use tokio::task::JoinSet;
use tokio::time::Instant;

const TTL: Duration = Duration::from_secs(30);

fn catalog() -> DatasetCatalog {
    DatasetCatalog::new()
        .with(DatasetRecipe::all_columns(key("contacts"), "Contacts!A:D"))
        .with(
            DatasetRecipe::all_columns(key("contacts-by-name"), "Contacts!A:D")
                .with_sort(order_by_field("Name", false))
                .with_ttl(Duration::from_secs(5)),
        )
        .with(DatasetRecipe::all_columns(key("archive"), "Archive!A:C"))
}

fn access(store: &Arc<ScriptedStore>) -> SheetAccess {
    SheetAccess::builder(store.clone())
        .with_retry_config(exact_retry())
        .with_catalog(catalog())
        .with_invalidation_map(InvalidationMap::new().route("Contacts", [key("contacts")]))
        .build()
        .unwrap()
}

fn scripted() -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::new(crm_store()))
}

#[tokio::test(start_paused = true)]
async fn test_reads_within_ttl_share_one_fetch() {
    let store = scripted();
    let access = access(&store);

    let first = access.read_dataset("contacts").await.unwrap();
    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    let second = access.read_dataset("contacts").await.unwrap();

    assert_eq!(store.read_calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_positions(&first, &[2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_expired_snapshot_is_refetched() {
    let store = scripted();
    let access = access(&store);

    access.read_dataset("contacts").await.unwrap();
    tokio::time::advance(TTL).await;
    assert_eq!(access.state(&key("contacts")), EntryState::Stale);

    access.read_dataset("contacts").await.unwrap();
    assert_eq!(store.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_override_per_recipe() {
    let store = scripted();
    let access = access(&store);

    access.read_dataset("contacts-by-name").await.unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;
    let sorted = access.read_dataset("contacts-by-name").await.unwrap();

    assert_eq!(store.read_calls(), 2);
    assert_field_values(&sorted, "Name", &["Ada Lovelace", "Grace Hopper", "Linus"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_coalesce_into_one_fetch() {
    let store = Arc::new(ScriptedStore::new(crm_store()).with_read_delay(Duration::from_millis(250)));
    let access = Arc::new(access(&store));
    let mut set = JoinSet::new();

    for _ in 0..16 {
        let access = Arc::clone(&access);
        set.spawn(async move { access.read_dataset("contacts").await.unwrap() });
    }

    let mut results = Vec::new();
    while let Some(result) = set.join_next().await {
        results.push(result.unwrap());
    }

    assert_eq!(store.read_calls(), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert_eq!(access.flight_stats().leaders, 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_after_invalidate_refetches() {
    let store = scripted();
    let access = access(&store);

    access.read_dataset("contacts").await.unwrap();
    let before = access.write_clock();
    access.invalidate(Some(&key("contacts")));

    assert!(access.write_clock() > before);
    assert_eq!(access.state(&key("contacts")), EntryState::Stale);
    access.read_dataset("contacts").await.unwrap();
    assert_eq!(store.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_all_refetches_every_dataset() {
    let store = scripted();
    let access = access(&store);

    access.read_dataset("contacts").await.unwrap();
    access.read_dataset("contacts-by-name").await.unwrap();
    access.invalidate(None);
    access.read_dataset("contacts").await.unwrap();
    access.read_dataset("contacts-by-name").await.unwrap();

    assert_eq!(store.read_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let store = scripted();
    let access = access(&store);
    store.fail_next_reads([rate_limited(), backend_error()]);

    let started = Instant::now();
    let records = access.read_dataset("contacts").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(store.read_calls(), 3);
    assert_eq!(records.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_without_snapshot_cache_empty() {
    let store = scripted();
    let access = access(&store);
    store.fail_all_reads(backend_error());

    let started = Instant::now();
    let records = access.read_dataset("contacts").await.unwrap();

    assert!(records.is_empty());
    assert_eq!(store.read_calls(), 3);
    let entry = access.registry().get(&key("contacts"));
    assert!(entry.has_snapshot());
    assert!(entry.last_refreshed_at.unwrap() >= started);

    // The cached empty list is fresh, so no further calls within the TTL.
    access.read_dataset("contacts").await.unwrap();
    assert_eq!(store.read_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_serves_previous_snapshot_without_restamping() {
    let store = scripted();
    let access = access(&store);

    let snapshot = access.read_dataset("contacts").await.unwrap();
    let stamped = access
        .registry()
        .get(&key("contacts"))
        .last_refreshed_at
        .unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    store.fail_all_reads(rate_limited());
    let served = access.read_dataset("contacts").await.unwrap();

    assert!(Arc::ptr_eq(&snapshot, &served));
    assert_eq!(
        access.registry().get(&key("contacts")).last_refreshed_at,
        Some(stamped)
    );
    assert_eq!(access.state(&key("contacts")), EntryState::Stale);

    // Still stale, so the next read tries the store again.
    store.clear_failures();
    store.reset_counts();
    access.read_dataset("contacts").await.unwrap();
    assert_eq!(store.read_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_propagates_without_retry() {
    let store = scripted();
    let access = access(&store);
    let snapshot = access.read_dataset("contacts").await.unwrap();
    access.invalidate(Some(&key("contacts")));
    store.fail_next_reads([RemoteError::new(403, "The caller does not have permission")]);

    let started = Instant::now();
    let err = access.read_dataset("contacts").await.unwrap_err();

    assert!(matches!(err, SheetlineError::Remote(ref e) if e.code == 403));
    assert_eq!(store.read_calls(), 2);
    assert_eq!(started.elapsed(), Duration::ZERO);

    // The snapshot survives for the next successful refresh to replace.
    let entry = access.registry().get(&key("contacts"));
    assert!(Arc::ptr_eq(entry.snapshot.as_ref().unwrap(), &snapshot));
    assert_eq!(access.state(&key("contacts")), EntryState::Stale);
}

#[tokio::test(start_paused = true)]
async fn test_missing_sheet_caches_empty_without_retry() {
    let store = scripted();
    let access = access(&store);

    let started = Instant::now();
    let records = access.read_dataset("archive").await.unwrap();

    assert!(records.is_empty());
    assert_eq!(store.read_calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(access.state(&key("archive")), EntryState::Fresh);

    access.read_dataset("archive").await.unwrap();
    assert_eq!(store.read_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_absent_fields_read_as_empty() {
    let store = scripted();
    let access = access(&store);

    let records = access.read_dataset("contacts").await.unwrap();
    let grace = &records[1];

    assert_eq!(grace.get("Name"), "Grace Hopper");
    assert_eq!(grace.get("Phone"), "");
    assert_eq!(grace.get("Fax"), "");
}

#[tokio::test(start_paused = true)]
async fn test_custom_read_with_inline_parser() {
    let store = scripted();
    let access = access(&store);
    let parser = sheetline_storage::row_parser(|row, _| {
        let email = row.field("Email");
        if email.is_empty() {
            return None;
        }
        Some(sheetline_core::Record::new().with("email", email))
    });

    let records = access
        .read(
            &key("emails"),
            TTL,
            || store.read_range("Contacts!A:D"),
            parser.as_ref(),
            None,
        )
        .await
        .unwrap();

    assert_field_values(&records, "email", &["ada@example.com", "grace@example.com"]);
    assert_positions(&records, &[2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_dataset_is_a_programmer_error() {
    let store = scripted();
    let access = access(&store);

    let err = access.read_dataset("invoices").await.unwrap_err();
    assert!(matches!(
        err,
        SheetlineError::Programmer(ProgrammerError::UnknownDataset { .. })
    ));
    assert_eq!(store.read_calls(), 0);
}
