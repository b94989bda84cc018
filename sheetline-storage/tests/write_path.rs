//! Lookups and writes end to end: retries, error propagation and
//! invalidation of dependent datasets.

use std::sync::Arc;
use std::time::Duration;

use sheetline_core::{ProgrammerError, RemoteError, RowPosition, SheetlineError};
use sheetline_storage::{
    DatasetCatalog, DatasetRecipe, EntryState, FieldUpdate, InvalidationMap, SheetAccess,
};
use sheetline_test_utils::fixtures::{
    backend_error, crm_store, exact_retry, grid, key, rate_limited,
};
use sheetline_test_utils::ScriptedStore;

fn access(store: &Arc<ScriptedStore>) -> SheetAccess {
    SheetAccess::builder(store.clone())
        .with_retry_config(exact_retry())
        .with_catalog(
            DatasetCatalog::new()
                .with(DatasetRecipe::all_columns(key("contacts"), "Contacts!A:D"))
                .with(DatasetRecipe::all_columns(key("companies"), "Companies!A:B")),
        )
        .with_invalidation_map(
            InvalidationMap::new()
                .route("Contacts", [key("contacts")])
                .route("Companies", [key("companies")]),
        )
        .build()
        .unwrap()
}

fn scripted() -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::new(crm_store()))
}

#[tokio::test(start_paused = true)]
async fn test_find_by_value_matches_whole_value_ignoring_case() {
    let store = scripted();
    let access = access(&store);

    let found = access
        .find_by_value("Companies!A:B", 1, "Acme")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.position, RowPosition::new(2));
    assert_eq!(found.row_data, vec!["1", "acme"]);
}

#[tokio::test(start_paused = true)]
async fn test_find_by_value_is_never_cached() {
    let store = scripted();
    let access = access(&store);

    access.find_by_value("Companies!A:B", 0, "2").await.unwrap();
    access.find_by_value("Companies!A:B", 0, "2").await.unwrap();
    assert_eq!(store.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_find_by_value_edge_cases() {
    let store = scripted();
    let access = access(&store);

    assert!(access
        .find_by_value("Companies!A:B", 2, "acme")
        .await
        .unwrap()
        .is_none());
    assert!(access
        .find_by_value("Missing!A:B", 0, "1")
        .await
        .unwrap()
        .is_none());
    assert!(access
        .find_by_value("Companies!A:B", 1, "Acme Co")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_find_by_value_retries_then_propagates() {
    let store = scripted();
    let access = access(&store);

    store.fail_next_reads([rate_limited()]);
    assert!(access
        .find_by_value("Companies!A:B", 1, "acme")
        .await
        .unwrap()
        .is_some());
    assert_eq!(store.read_calls(), 2);

    store.fail_all_reads(backend_error());
    let err = access
        .find_by_value("Companies!A:B", 1, "acme")
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_write_invalidates_only_dependent_datasets() {
    let store = scripted();
    let access = access(&store);

    access.read_dataset("contacts").await.unwrap();
    access.read_dataset("companies").await.unwrap();
    let before = access.write_clock();

    access
        .writer()
        .update_fields("Contacts", 3, &[("Phone", "555-0199")])
        .await
        .unwrap();

    assert!(access.write_clock() > before);
    assert_eq!(access.state(&key("contacts")), EntryState::Stale);
    assert_eq!(access.state(&key("companies")), EntryState::Fresh);

    let contacts = access.read_dataset("contacts").await.unwrap();
    assert_eq!(contacts[1].get("Phone"), "555-0199");
    assert_eq!(contacts[1].get("Email"), "grace@example.com");
}

#[tokio::test(start_paused = true)]
async fn test_append_and_delete_round_through_the_cache() {
    let store = scripted();
    let access = access(&store);
    let writer = access.writer();

    writer
        .append_row("Companies!A:B", vec!["3".into(), "Initech".into()])
        .await
        .unwrap();
    let companies = access.read_dataset("companies").await.unwrap();
    assert_eq!(companies.len(), 3);
    assert_eq!(companies[2].position(), Some(RowPosition::new(4)));

    writer.delete_row("Companies", 2).await.unwrap();
    let companies = access.read_dataset("companies").await.unwrap();
    let names: Vec<_> = companies.iter().map(|r| r.get("name")).collect();
    assert_eq!(names, vec!["Acme Corp", "Initech"]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_write_failure_is_retried() {
    let store = scripted();
    let access = access(&store);
    store.fail_next_writes([rate_limited()]);

    access
        .writer()
        .update_row("Companies", 3, vec!["2".into(), "Acme Corporation".into()])
        .await
        .unwrap();

    assert_eq!(store.write_calls(), 2);
    assert_eq!(
        store.inner().sheet_rows("Companies").unwrap()[2][1],
        "Acme Corporation"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_propagates_without_invalidating() {
    let store = scripted();
    let access = access(&store);
    access.read_dataset("contacts").await.unwrap();
    let before = access.write_clock();

    store.fail_next_writes([RemoteError::new(403, "The caller does not have permission")]);
    let err = access
        .writer()
        .append_row("Contacts!A:D", vec!["C4".into()])
        .await
        .unwrap_err();

    assert!(matches!(err, SheetlineError::Remote(ref e) if e.code == 403));
    assert_eq!(store.write_calls(), 1);
    assert_eq!(access.write_clock(), before);
    assert_eq!(access.state(&key("contacts")), EntryState::Fresh);
}

#[tokio::test(start_paused = true)]
async fn test_row_position_guards() {
    let store = scripted();
    let access = access(&store);

    let err = access
        .writer()
        .delete_row("Contacts", 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SheetlineError::Programmer(ProgrammerError::InvalidRowPosition { position: 1 })
    ));
    assert_eq!(store.write_calls(), 0);
    assert_eq!(store.read_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_update_fields_with_one_write() {
    let store = scripted();
    let access = access(&store);

    let outcome = access
        .writer()
        .batch_update_fields(
            "Contacts",
            &[
                FieldUpdate::new(2).set("Phone", "555-0111"),
                FieldUpdate::new(4).set("Email", "linus@example.com"),
                FieldUpdate::new(40).set("Email", "nobody@example.com"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.skipped, vec![RowPosition::new(40)]);
    assert_eq!(store.write_calls(), 1);

    let contacts = access.read_dataset("contacts").await.unwrap();
    assert_eq!(contacts[0].get("Phone"), "555-0111");
    assert_eq!(contacts[2].get("Email"), "linus@example.com");
}

/// Field updates are read-modify-write with no version check, so two
/// overlapping updates of one row can lose a change.
#[tokio::test(start_paused = true)]
async fn test_overlapping_field_updates_can_lose_one_change() {
    let store = Arc::new(ScriptedStore::new(crm_store()).with_read_delay(Duration::from_millis(100)));
    let access = Arc::new(access(&store));

    let first = {
        let access = Arc::clone(&access);
        tokio::spawn(async move {
            access
                .writer()
                .update_fields("Contacts", 2, &[("Email", "ada@analytical.engine")])
                .await
        })
    };
    let second = {
        let access = Arc::clone(&access);
        tokio::spawn(async move {
            access
                .writer()
                .update_fields("Contacts", 2, &[("Phone", "555-0142")])
                .await
        })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let row = &store.inner().sheet_rows("Contacts").unwrap()[1];
    let email_kept = row[2] == "ada@analytical.engine";
    let phone_kept = row[3] == "555-0142";
    assert!(email_kept != phone_kept, "exactly one change survives: {:?}", row);
}

#[tokio::test(start_paused = true)]
async fn test_read_and_lookup_agree_on_positions_below_a_title_row() {
    let store = scripted();
    store.inner().insert_sheet(
        "Pipeline",
        grid(&[
            &["Q3 pipeline"],
            &["id", "company"],
            &["1", "Acme"],
            &["2", "Globex"],
        ]),
    );
    let access = SheetAccess::builder(store.clone())
        .with_retry_config(exact_retry())
        .with_catalog(
            DatasetCatalog::new().with(DatasetRecipe::all_columns(key("pipeline"), "Pipeline!A2:B")),
        )
        .with_invalidation_map(InvalidationMap::new().route("Pipeline", [key("pipeline")]))
        .build()
        .unwrap();

    let deals = access.read_dataset("pipeline").await.unwrap();
    let globex = deals.iter().find(|r| r.get("company") == "Globex").unwrap();
    let found = access
        .find_by_value("Pipeline!A2:B", 1, "globex")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(globex.position(), Some(found.position));
    assert_eq!(found.position, RowPosition::new(4));

    access
        .writer()
        .update_row("Pipeline", found.position.get(), vec!["2".into(), "Globex Corp".into()])
        .await
        .unwrap();
    let deals = access.read_dataset("pipeline").await.unwrap();
    assert_eq!(deals[1].get("company"), "Globex Corp");
    assert_eq!(deals[1].position(), Some(RowPosition::new(4)));
    assert_eq!(deals[0].get("company"), "Acme");
}

#[tokio::test(start_paused = true)]
async fn test_find_or_append_reuses_or_creates_company() {
    let store = scripted();
    let access = access(&store);
    access.read_dataset("companies").await.unwrap();

    let existing = access
        .writer()
        .find_or_append("Companies!A:B", 1, "ACME", vec!["9".into(), "Acme".into()])
        .await
        .unwrap();
    assert!(!existing.created);
    assert_eq!(existing.row.position, RowPosition::new(2));
    assert_eq!(store.write_calls(), 0);
    assert_eq!(access.state(&key("companies")), EntryState::Fresh);

    let created = access
        .writer()
        .find_or_append("Companies!A:B", 1, "Initech", vec!["3".into(), "Initech".into()])
        .await
        .unwrap();
    assert!(created.created);
    assert_eq!(created.row.position, RowPosition::new(4));
    assert_eq!(store.write_calls(), 1);
    assert_eq!(access.state(&key("companies")), EntryState::Stale);

    let companies = access.read_dataset("companies").await.unwrap();
    assert_eq!(companies[2].position(), Some(created.row.position));
    assert_eq!(companies[2].get("name"), "Initech");
}
