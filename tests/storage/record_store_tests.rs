//! RecordStore interface tests.
//!
//! These tests verify the contract of the RecordStore trait.
//! Each storage implementation should run these tests. Tests share one store,
//! so every test works in its own partitions and sort-key namespace.

use std::time::Duration;

use chrono::Utc;

use tabula::storage::{Item, Patch, RecordStore, StorageError, Value};

/// Unix seconds one second in the past.
pub fn already_expired() -> i64 {
    Utc::now().timestamp() - 1
}

/// Sort keys of a result, in order.
pub fn sort_keys(records: &[tabula::storage::Record]) -> Vec<String> {
    records.iter().map(|r| r.sort_key.clone()).collect()
}

// =============================================================================
// RecordStore::put / get tests
// =============================================================================

pub async fn test_get_nonexistent<S: RecordStore>(store: &S) {
    let record = store
        .get("test_get_none", "PROFILE#0")
        .await
        .expect("get should succeed");
    assert!(record.is_none(), "nonexistent record should be None");
}

pub async fn test_put_then_get<S: RecordStore>(store: &S) {
    store
        .put(
            "test_put_get",
            "PROFILE#0",
            Item::new()
                .with("name", "Ann")
                .with("age", 41_i64)
                .with("active", true)
                .with("nickname", Value::Null),
        )
        .await
        .expect("put should succeed");

    let record = store
        .get("test_put_get", "PROFILE#0")
        .await
        .expect("get should succeed")
        .expect("record should exist");

    assert_eq!(record.partition_key, "test_put_get");
    assert_eq!(record.sort_key, "PROFILE#0");
    assert_eq!(record.attribute("name"), Some(&Value::from("Ann")));
    assert_eq!(record.attribute("age"), Some(&Value::Number(41.0)));
    assert_eq!(record.attribute("active"), Some(&Value::Bool(true)));
    assert_eq!(record.attribute("nickname"), Some(&Value::Null));
    assert!(record.updated_at.is_none());
    assert!(record.expires_at.is_none());
}

pub async fn test_put_replaces_not_merges<S: RecordStore>(store: &S) {
    let first = store
        .put("test_put_replace", "PROFILE#0", Item::new().with("name", "Ann"))
        .await
        .expect("first put should succeed");
    let second = store
        .put("test_put_replace", "PROFILE#0", Item::new().with("city", "Oslo"))
        .await
        .expect("second put should succeed");

    let records = store
        .query_by_partition("test_put_replace", None)
        .await
        .expect("query should succeed");
    assert_eq!(records.len(), 1, "repeated put should leave one record");
    assert_eq!(records[0].attribute("name"), None);
    assert_eq!(records[0].attribute("city"), Some(&Value::from("Oslo")));
    assert_eq!(first.created_at, second.created_at);
}

pub async fn test_put_rejects_invalid_keys<S: RecordStore>(store: &S) {
    for (pk, sk) in [
        ("", "PROFILE#0"),
        ("test_invalid", ""),
        ("a\0b", "PROFILE#0"),
        ("test_invalid", "PROFILE\0#0"),
    ] {
        let err = store
            .put(pk, sk, Item::new())
            .await
            .expect_err("invalid key should be rejected");
        assert!(matches!(err, StorageError::InvalidKey(_)), "got {err:?}");
    }
}

pub async fn test_put_rejects_reserved_attribute<S: RecordStore>(store: &S) {
    let err = store
        .put(
            "test_put_reserved",
            "PROFILE#0",
            Item::new().with("updatedAt", "now"),
        )
        .await
        .expect_err("reserved attribute should be rejected");
    assert!(matches!(err, StorageError::ReservedField(ref f) if f == "updatedAt"));

    let record = store
        .get("test_put_reserved", "PROFILE#0")
        .await
        .expect("get should succeed");
    assert!(record.is_none(), "rejected put should store nothing");
}

pub async fn test_rejects_non_finite_numbers<S: RecordStore>(store: &S) {
    let err = store
        .put("test_non_finite", "PROFILE#0", Item::new().with("score", f64::NAN))
        .await
        .expect_err("NaN should be rejected");
    assert!(matches!(err, StorageError::InvalidValue(ref f) if f == "score"));
    assert!(store
        .get("test_non_finite", "PROFILE#0")
        .await
        .expect("get should succeed")
        .is_none());

    store
        .put("test_non_finite", "PROFILE#1", Item::new().with("score", 1_i64))
        .await
        .expect("put should succeed");
    let err = store
        .patch(
            "test_non_finite",
            "PROFILE#1",
            Patch::new().set("score", f64::INFINITY),
        )
        .await
        .expect_err("infinity should be rejected");
    assert!(matches!(err, StorageError::InvalidValue(_)));

    let record = store
        .get("test_non_finite", "PROFILE#1")
        .await
        .expect("get should succeed")
        .expect("record should exist");
    assert_eq!(record.attribute("score"), Some(&Value::Number(1.0)));
}

// =============================================================================
// Query tests
// =============================================================================

pub async fn test_query_by_partition_prefix<S: RecordStore>(store: &S) {
    for sk in ["PROFILE#1", "DETAIL#2", "DETAIL#1"] {
        store
            .put("test_query_part", sk, Item::new())
            .await
            .expect("put should succeed");
    }

    let details = store
        .query_by_partition("test_query_part", Some("DETAIL"))
        .await
        .expect("query should succeed");
    assert_eq!(sort_keys(&details), vec!["DETAIL#1", "DETAIL#2"]);

    let all = store
        .query_by_partition("test_query_part", None)
        .await
        .expect("query should succeed");
    assert_eq!(sort_keys(&all), vec!["DETAIL#1", "DETAIL#2", "PROFILE#1"]);
}

pub async fn test_query_partition_isolation<S: RecordStore>(store: &S) {
    store
        .put("test_iso_U1", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");
    store
        .put("test_iso_U10", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");

    let records = store
        .query_by_partition("test_iso_U1", None)
        .await
        .expect("query should succeed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].partition_key, "test_iso_U1");
}

pub async fn test_query_by_sort_prefix_spans_partitions<S: RecordStore>(store: &S) {
    for (pk, sk) in [
        ("test_sp_b", "TESTSP#x#2"),
        ("test_sp_a", "TESTSP#x#2"),
        ("test_sp_a", "TESTSP#y#1"),
        ("test_sp_c", "OTHER#x#1"),
    ] {
        store
            .put(pk, sk, Item::new())
            .await
            .expect("put should succeed");
    }

    let records = store
        .query_by_sort_prefix("TESTSP#x#")
        .await
        .expect("query should succeed");
    let keys: Vec<_> = records
        .iter()
        .map(|r| (r.partition_key.as_str(), r.sort_key.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![("test_sp_a", "TESTSP#x#2"), ("test_sp_b", "TESTSP#x#2")]
    );

    let all = store
        .query_by_sort_prefix("TESTSP#")
        .await
        .expect("query should succeed");
    assert_eq!(all.len(), 3);
}

pub async fn test_scan_includes_partitions<S: RecordStore>(store: &S) {
    store
        .put("test_scan_a", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");
    store
        .put("test_scan_b", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");

    let records = store.scan().await.expect("scan should succeed");
    let keys: Vec<_> = records
        .iter()
        .map(|r| (r.partition_key.clone(), r.sort_key.clone()))
        .collect();
    let a = keys
        .iter()
        .position(|(pk, _)| pk == "test_scan_a")
        .expect("scan should include test_scan_a");
    let b = keys
        .iter()
        .position(|(pk, _)| pk == "test_scan_b")
        .expect("scan should include test_scan_b");
    assert!(a < b, "scan should be ordered by partition key");
}

// =============================================================================
// RecordStore::patch tests
// =============================================================================

pub async fn test_patch_end_to_end<S: RecordStore>(store: &S) {
    let created = store
        .put(
            "test_patch",
            "PROFILE#1",
            Item::new().with("name", "Ann").with("nickname", "A"),
        )
        .await
        .expect("put should succeed");

    tokio::time::sleep(Duration::from_millis(5)).await;

    store
        .patch(
            "test_patch",
            "PROFILE#1",
            Patch::new().set("name", "Anna").remove("nickname"),
        )
        .await
        .expect("patch should succeed");

    let record = store
        .get("test_patch", "PROFILE#1")
        .await
        .expect("get should succeed")
        .expect("record should exist");
    assert_eq!(record.attribute("name"), Some(&Value::from("Anna")));
    assert_eq!(record.attribute("nickname"), None);
    assert_eq!(record.created_at, created.created_at);
    let updated_at = record.updated_at.expect("patch should set updatedAt");
    assert!(updated_at > record.created_at);
}

pub async fn test_patch_conflict_leaves_record_unchanged<S: RecordStore>(store: &S) {
    let before = store
        .put("test_patch_conflict", "PROFILE#1", Item::new().with("name", "Ann"))
        .await
        .expect("put should succeed");

    let err = store
        .patch(
            "test_patch_conflict",
            "PROFILE#1",
            Patch::new().set("name", "B").set("city", "Oslo").remove("name"),
        )
        .await
        .expect_err("conflicting patch should fail");
    assert!(matches!(err, StorageError::ConflictingFieldOp(ref f) if f == "name"));

    let after = store
        .get("test_patch_conflict", "PROFILE#1")
        .await
        .expect("get should succeed")
        .expect("record should exist");
    assert_eq!(after, before);
}

pub async fn test_patch_nonexistent<S: RecordStore>(store: &S) {
    let err = store
        .patch("test_patch_none", "PROFILE#1", Patch::new().set("a", 1_i64))
        .await
        .expect_err("patching a missing record should fail");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

pub async fn test_patch_rejects_reserved_and_empty<S: RecordStore>(store: &S) {
    store
        .put("test_patch_reserved", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");

    let err = store
        .patch(
            "test_patch_reserved",
            "PROFILE#1",
            Patch::new().set("sortKey", "OTHER"),
        )
        .await
        .expect_err("reserved field should be rejected");
    assert!(matches!(err, StorageError::ReservedField(_)));

    let err = store
        .patch("test_patch_reserved", "PROFILE#1", Patch::new())
        .await
        .expect_err("empty patch should be rejected");
    assert!(matches!(err, StorageError::EmptyPatch));
}

pub async fn test_patch_sets_and_clears_expiry<S: RecordStore>(store: &S) {
    store
        .put("test_patch_ttl", "ACTIVITY#1", Item::new())
        .await
        .expect("put should succeed");

    let record = store
        .patch(
            "test_patch_ttl",
            "ACTIVITY#1",
            Patch::new().expire_after(Duration::from_secs(3600)),
        )
        .await
        .expect("patch should succeed");
    assert!(record.expires_at.is_some());

    let record = store
        .patch("test_patch_ttl", "ACTIVITY#1", Patch::new().clear_expiry())
        .await
        .expect("patch should succeed");
    assert!(record.expires_at.is_none());
}

// =============================================================================
// RecordStore::delete tests
// =============================================================================

pub async fn test_delete_is_idempotent<S: RecordStore>(store: &S) {
    store
        .put("test_delete", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");

    store
        .delete("test_delete", "PROFILE#1")
        .await
        .expect("delete should succeed");
    store
        .delete("test_delete", "PROFILE#1")
        .await
        .expect("second delete should succeed");

    assert!(store
        .get("test_delete", "PROFILE#1")
        .await
        .expect("get should succeed")
        .is_none());
    assert!(store
        .query_by_sort_prefix("PROFILE#1")
        .await
        .expect("query should succeed")
        .iter()
        .all(|r| r.partition_key != "test_delete"));
}

// =============================================================================
// Expiry tests
// =============================================================================

pub async fn test_expired_record_is_hidden<S: RecordStore>(store: &S) {
    store
        .put(
            "test_expired",
            "TESTEXP#1",
            Item::new().expires_at(already_expired()),
        )
        .await
        .expect("put should succeed");

    assert!(store
        .get("test_expired", "TESTEXP#1")
        .await
        .expect("get should succeed")
        .is_none());
    assert!(store
        .query_by_partition("test_expired", None)
        .await
        .expect("query should succeed")
        .is_empty());
    assert!(store
        .query_by_sort_prefix("TESTEXP#")
        .await
        .expect("query should succeed")
        .is_empty());
    assert!(store
        .scan()
        .await
        .expect("scan should succeed")
        .iter()
        .all(|r| r.partition_key != "test_expired"));

    let err = store
        .patch("test_expired", "TESTEXP#1", Patch::new().set("a", 1_i64))
        .await
        .expect_err("expired record should not be patchable");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

pub async fn test_reap_removes_expired_only<S: RecordStore>(store: &S) {
    store
        .put(
            "test_reap",
            "TESTREAP#old",
            Item::new().expires_at(already_expired()),
        )
        .await
        .expect("put should succeed");
    store
        .put(
            "test_reap",
            "TESTREAP#live",
            Item::new().with_ttl(Duration::from_secs(3600)),
        )
        .await
        .expect("put should succeed");

    let expired = store
        .expired_keys(usize::MAX)
        .await
        .expect("expired_keys should succeed");
    assert!(expired
        .iter()
        .any(|k| k.as_str() == "test_reap\0TESTREAP#old"));
    assert!(!expired
        .iter()
        .any(|k| k.as_str() == "test_reap\0TESTREAP#live"));

    assert!(store
        .reap("test_reap", "TESTREAP#old")
        .await
        .expect("reap should succeed"));
    assert!(!store
        .reap("test_reap", "TESTREAP#live")
        .await
        .expect("reap should succeed"));
    assert!(!store
        .reap("test_reap", "TESTREAP#missing")
        .await
        .expect("reap should succeed"));

    let live = store
        .query_by_partition("test_reap", None)
        .await
        .expect("query should succeed");
    assert_eq!(sort_keys(&live), vec!["TESTREAP#live"]);
}

pub async fn test_put_over_expired_resets_created_at<S: RecordStore>(store: &S) {
    let stale = store
        .put(
            "test_reput",
            "PROFILE#1",
            Item::new().expires_at(already_expired()),
        )
        .await
        .expect("put should succeed");

    tokio::time::sleep(Duration::from_millis(5)).await;

    let fresh = store
        .put("test_reput", "PROFILE#1", Item::new())
        .await
        .expect("put should succeed");
    assert!(fresh.created_at > stale.created_at);
    assert!(fresh.expires_at.is_none());
}

#[macro_export]
macro_rules! run_record_store_tests {
    ($store:expr) => {
        use $crate::storage::record_store_tests::*;

        // put/get tests
        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_put_then_get($store).await;
        println!("  test_put_then_get: PASSED");

        test_put_replaces_not_merges($store).await;
        println!("  test_put_replaces_not_merges: PASSED");

        test_put_rejects_invalid_keys($store).await;
        println!("  test_put_rejects_invalid_keys: PASSED");

        test_put_rejects_reserved_attribute($store).await;
        println!("  test_put_rejects_reserved_attribute: PASSED");

        test_rejects_non_finite_numbers($store).await;
        println!("  test_rejects_non_finite_numbers: PASSED");

        // query tests
        test_query_by_partition_prefix($store).await;
        println!("  test_query_by_partition_prefix: PASSED");

        test_query_partition_isolation($store).await;
        println!("  test_query_partition_isolation: PASSED");

        test_query_by_sort_prefix_spans_partitions($store).await;
        println!("  test_query_by_sort_prefix_spans_partitions: PASSED");

        test_scan_includes_partitions($store).await;
        println!("  test_scan_includes_partitions: PASSED");

        // patch tests
        test_patch_end_to_end($store).await;
        println!("  test_patch_end_to_end: PASSED");

        test_patch_conflict_leaves_record_unchanged($store).await;
        println!("  test_patch_conflict_leaves_record_unchanged: PASSED");

        test_patch_nonexistent($store).await;
        println!("  test_patch_nonexistent: PASSED");

        test_patch_rejects_reserved_and_empty($store).await;
        println!("  test_patch_rejects_reserved_and_empty: PASSED");

        test_patch_sets_and_clears_expiry($store).await;
        println!("  test_patch_sets_and_clears_expiry: PASSED");

        // delete tests
        test_delete_is_idempotent($store).await;
        println!("  test_delete_is_idempotent: PASSED");

        // expiry tests
        test_expired_record_is_hidden($store).await;
        println!("  test_expired_record_is_hidden: PASSED");

        test_reap_removes_expired_only($store).await;
        println!("  test_reap_removes_expired_only: PASSED");

        test_put_over_expired_resets_created_at($store).await;
        println!("  test_put_over_expired_resets_created_at: PASSED");
    };
}
