//! Result feed tests against the in-memory store.
//!
//! Covers paging, continuation tokens and the error kinds callers see.

use chrono::{TimeZone, Utc};
use docquery_core::expr::{param, Query};
use docquery_storage::{
    page_stream, DocumentContainer, DocumentDatabase, MemoryDocumentStore, MemoryStoreConfig,
    StoreError,
};
use futures::TryStreamExt;
use serde_json::json;
use std::sync::Arc;

async fn family_store() -> Arc<dyn DocumentContainer> {
    let store = MemoryDocumentStore::default();
    let families = store.open_container("families").await.unwrap();
    families
        .add(
            "AndersenFamily",
            json!({
                "LastName": "Andersen",
                "RegistrationDate": "2024-05-01T00:00:00.000Z",
                "IsRegistered": true
            }),
            None,
        )
        .await
        .unwrap();
    families
        .add(
            "WakefieldFamily",
            json!({
                "LastName": "Wakefield",
                "RegistrationDate": "2023-11-15T00:00:00.000Z",
                "IsRegistered": false
            }),
            None,
        )
        .await
        .unwrap();
    families
}

async fn numbered_store(count: usize) -> Arc<dyn DocumentContainer> {
    let store = MemoryDocumentStore::new(MemoryStoreConfig::new().with_page_size(10));
    let items = store.open_container("items").await.unwrap();
    for i in 0..count {
        items
            .add(&format!("item-{:03}", i), json!({"Seq": i}), None)
            .await
            .unwrap();
    }
    items
}

#[tokio::test]
async fn test_single_match_exhausts_feed() {
    let families = family_store().await;
    let query = Query::source("families")
        .filter("f", param("f").field("LastName").equals("Andersen"))
        .into_expr();

    let mut feed = families.create_query(&query, None, None).unwrap();
    assert!(feed.has_more());

    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.items[0].id, "AndersenFamily");
    assert!(page.continuation.is_none());
    assert!(!feed.has_more());

    let empty = feed.read_next(None).await.unwrap();
    assert!(empty.is_empty());
    assert!(empty.continuation.is_none());
}

#[tokio::test]
async fn test_order_by_take_one() {
    let families = family_store().await;
    let query = Query::source("families")
        .order_by("f", param("f").field("RegistrationDate"))
        .take(1)
        .into_expr();

    let mut feed = families.create_query(&query, None, None).unwrap();
    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.items[0].id, "WakefieldFamily");
}

#[tokio::test]
async fn test_date_constant_comparison() {
    let families = family_store().await;
    let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let query = Query::source("families")
        .filter("f", param("f").field("RegistrationDate").gt(cutoff))
        .into_expr();

    let mut feed = families.create_query(&query, None, None).unwrap();
    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.items[0].id, "AndersenFamily");
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn test_resume_with_new_page_size() {
    let items = numbered_store(55).await;
    let query = Query::source("items")
        .order_by("i", param("i").field("Seq"))
        .into_expr();

    let mut feed = items.create_query(&query, Some(10), None).unwrap();
    let first = feed.read_next(None).await.unwrap();
    assert_eq!(first.len(), 10);
    let token = first.continuation.expect("more pages remain");

    let mut resumed = items.continue_query(&token, Some(40), None);
    assert!(resumed.has_more());
    let second = resumed.read_next(None).await.unwrap();
    assert_eq!(second.len(), 40);
    assert_eq!(second.items[0].id, "item-010");
    let token = second.continuation.expect("more pages remain");

    let mut last = items.continue_query(&token, None, None);
    let third = last.read_next(Some(100)).await.unwrap();
    assert_eq!(third.len(), 5);
    assert_eq!(third.items[4].id, "item-054");
    assert!(third.continuation.is_none());
    assert!(!last.has_more());
}

#[tokio::test]
async fn test_token_claimed_once() {
    let items = numbered_store(20).await;
    let query = Query::source("items").into_expr();

    let mut feed = items.create_query(&query, Some(5), None).unwrap();
    let token = feed.read_next(None).await.unwrap().continuation.unwrap();

    let mut first = items.continue_query(&token, None, None);
    assert!(first.read_next(None).await.is_ok());

    let mut second = items.continue_query(&token, None, None);
    let err = second.read_next(None).await.unwrap_err();
    assert!(err.is_not_found(), "got {:?}", err);
}

#[tokio::test]
async fn test_reading_on_consumes_previous_token() {
    let items = numbered_store(20).await;
    let query = Query::source("items").into_expr();

    let mut feed = items.create_query(&query, Some(5), None).unwrap();
    let stale = feed.read_next(None).await.unwrap().continuation.unwrap();
    feed.read_next(None).await.unwrap();

    let mut resumed = items.continue_query(&stale, None, None);
    assert!(resumed.read_next(None).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_malformed_token_fails_on_read() {
    let families = family_store().await;
    // no error at call time
    let mut feed = families.continue_query("badtoken", None, None);
    assert!(feed.has_more());

    let err = feed.read_next(None).await.unwrap_err();
    assert!(matches!(err, StoreError::BadRequest(_)));
}

#[tokio::test]
async fn test_well_formed_unknown_token_is_not_found() {
    let families = family_store().await;
    let token = docquery_storage::ContinuationToken::new("families", uuid::Uuid::new_v4())
        .encode()
        .unwrap();
    let err = families
        .continue_query(&token, None, None)
        .read_next(None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_evicted_session_is_not_found() {
    let store = MemoryDocumentStore::new(MemoryStoreConfig::new().with_max_pending_continuations(1));
    let items = store.container("items");
    for i in 0..4 {
        items.add(&format!("{}", i), json!({"Seq": i}), None).await.unwrap();
    }
    let query = Query::source("items").into_expr();

    let mut a = items.create_query(&query, Some(1), None).unwrap();
    let token_a = a.read_next(None).await.unwrap().continuation.unwrap();
    let mut b = items.create_query(&query, Some(1), None).unwrap();
    b.read_next(None).await.unwrap();
    assert_eq!(items.pending_continuations(), 1);

    let err = items
        .continue_query(&token_a, None, None)
        .read_next(None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_partition_key_scopes_query() {
    let store = MemoryDocumentStore::default();
    let families = store.container("families");
    families.add("a", json!({"State": "WA"}), Some("WA")).await.unwrap();
    families.add("b", json!({"State": "NY"}), Some("NY")).await.unwrap();
    families.add("c", json!({"State": "WA"}), Some("WA")).await.unwrap();

    let query = Query::source("families").into_expr();
    let mut feed = families.create_query(&query, Some(1), Some("WA")).unwrap();
    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.items[0].id, "a");
    let token = page.continuation.unwrap();

    let err = families
        .continue_query(&token, None, Some("NY"))
        .read_next(None)
        .await
        .unwrap_err();
    assert!(err.is_bad_request());

    let page = families
        .continue_query(&token, None, Some("WA"))
        .read_next(None)
        .await
        .unwrap();
    assert_eq!(page.items[0].id, "c");
    assert!(page.continuation.is_none());
}

#[tokio::test]
async fn test_translation_error_surfaces_at_create() {
    let families = family_store().await;
    let query = Query::source("families")
        .order_by("f", param("f").field("LastName"))
        .then_by_descending("f", param("f").field("RegistrationDate"))
        .into_expr();
    let err = families.create_query(&query, None, None).err().unwrap();
    assert!(matches!(err, StoreError::Query(_)));
}

#[tokio::test]
async fn test_distinct_runs_in_memory() {
    let families = family_store().await;
    let query = Query::source("families")
        .select("f", param("f").field("IsRegistered"))
        .distinct()
        .into_expr();
    assert!(!docquery_mango::is_valid(&query));

    let mut feed = families.create_query(&query, None, None).unwrap();
    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_page_stream_reads_everything() {
    let items = numbered_store(25).await;
    let query = Query::source("items").into_expr();
    let feed = items.create_query(&query, Some(10), None).unwrap();

    let pages: Vec<_> = page_stream(feed).try_collect().await.unwrap();
    let sizes: Vec<_> = pages.iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
}

#[tokio::test]
async fn test_conflict_and_out_of_date_kinds() {
    let families = family_store().await;
    let err = families
        .add("AndersenFamily", json!({}), None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = families
        .upsert("AndersenFamily", json!({}), None, Some("stale"))
        .await
        .unwrap_err();
    assert!(err.is_out_of_date());
}

#[tokio::test]
async fn test_mod_on_smallest_integer_does_not_abort() {
    let store = MemoryDocumentStore::default();
    let numbers = store.container("numbers");
    numbers.add("min", json!({"N": i64::MIN}), None).await.unwrap();

    let query = Query::source("numbers")
        .filter("f", param("f").field("N").modulo(-1).equals(0))
        .into_expr();
    assert!(docquery_mango::is_valid(&query));

    let mut feed = numbers.create_query(&query, None, None).unwrap();
    let page = feed.read_next(None).await.unwrap();
    assert_eq!(page.items[0].id, "min");

    // the container stays usable afterwards
    assert_eq!(numbers.len(), 1);
}
