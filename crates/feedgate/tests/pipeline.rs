//! End-to-end behavior of the authorization cache and metering pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedgate::auth::AuthError;
use feedgate::core::{ArchivalBatch, Clock, ResourceId, StatusRecord, SubjectId};
use feedgate::meter::{ArchivalDrainer, DrainConfig, MeterConfig, SkipReason};
use feedgate::store::{CounterStore, KeyValueStore};
use feedgate::{AppConfig, AppContext};
use feedgate_testkit::{access_plan, counter_key, TestBackends};
use proptest::prelude::*;

const ARCHIVE_BUCKET: &str = "user-logs";

async fn start(test: &TestBackends, config: AppConfig) -> AppContext {
    AppContext::start_with_clock(config, test.backends(), test.clock.clone())
        .await
        .unwrap()
}

fn ids(resource: &str, subject: &str) -> (ResourceId, SubjectId) {
    (
        ResourceId::new(resource).unwrap(),
        SubjectId::new(subject).unwrap(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_credential_is_cached_as_negative() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;

    let status = app.gate().authorize(Some("U1")).await.unwrap();
    assert_eq!(status, StatusRecord::UNKNOWN);
    assert_eq!(
        test.kv.get("apikey:U1").await.unwrap().as_deref(),
        Some(r#"{"exists":false,"premium":false}"#)
    );

    let again = app.gate().authorize(Some("U1")).await.unwrap();
    assert_eq!(again, status);
    assert_eq!(test.records.lookup_count(), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn negative_and_unentitled_records_both_short_circuit() {
    let test = TestBackends::new();
    test.register("U3", None);
    let app = start(&test, AppConfig::default()).await;

    let unknown = app.gate().authorize(Some("U1")).await.unwrap();
    let unentitled = app.gate().authorize(Some("U3")).await.unwrap();
    assert_eq!(unknown, StatusRecord::UNKNOWN);
    assert_eq!(unentitled, StatusRecord::registered(false));
    assert_ne!(unknown, unentitled);

    for _ in 0..3 {
        assert_eq!(app.gate().authorize(Some("U1")).await.unwrap(), unknown);
        assert_eq!(app.gate().authorize(Some("U3")).await.unwrap(), unentitled);
    }
    assert_eq!(test.records.lookup_count(), 2);

    app.shutdown().await;
}

#[tokio::test]
async fn record_store_outage_denies_without_caching() {
    let test = TestBackends::new();
    test.register("U2", Some(true));
    test.records.set_unavailable(true);
    let app = start(&test, AppConfig::default()).await;

    assert!(matches!(
        app.gate().authorize(Some("U2")).await,
        Err(AuthError::RecordLookupTransientFailure(_))
    ));
    assert!(test.kv.is_empty());

    test.records.set_unavailable(false);
    assert_eq!(
        app.gate().authorize(Some("U2")).await.unwrap(),
        StatusRecord::registered(true)
    );

    app.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Metering and drain
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_are_all_drained() {
    let test = TestBackends::new();
    let config = AppConfig::default().with_meter(MeterConfig::default().with_queue_capacity(4096));
    let app = Arc::new(start(&test, config).await);

    let mut handles = Vec::new();
    for _ in 0..500 {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            let (resource, subject) = ids("R7", "U2");
            app.meter().record(resource, subject)
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    app.meter().shutdown().await;
    assert_eq!(app.meter().stats().dropped, 0);
    assert_eq!(
        test.counters.get_del(&counter_key("R7", "U2")).await.unwrap(),
        Some(500)
    );
}

#[tokio::test]
async fn three_accesses_are_archived_once() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;

    for _ in 0..3 {
        let (resource, subject) = ids("R7", "U2");
        app.meter().record(resource, subject);
    }
    app.meter().shutdown().await;

    let report = app.drainer().drain_once().await;
    assert_eq!(report.units_drained, 3);
    assert_eq!(test.count("R7", "U2"), None);

    let archived = test.archived(ARCHIVE_BUCKET);
    assert_eq!(archived.len(), 1);
    let (name, entries) = &archived[0];
    assert_eq!(name, "U2/detail-log-2024-05-01T10-00-07.json");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resource.as_str(), "R7");
    assert_eq!(entries[0].access_count, 3);

    let object = &test.blobs.objects_in(ARCHIVE_BUCKET)[0];
    let body: serde_json::Value = serde_json::from_slice(&object.body).unwrap();
    assert_eq!(body[0]["newsID"], "R7");
    assert_eq!(body[0]["accessCount"], "3");

    // Nothing left for a second cycle.
    test.clock.advance(chrono::Duration::minutes(30));
    let report = app.drainer().drain_once().await;
    assert_eq!(report.units_drained, 0);
    assert_eq!(test.archived(ARCHIVE_BUCKET).len(), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn failed_upload_restores_and_next_cycle_archives() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;
    test.counters
        .incr_by(&counter_key("R7", "U2"), 3)
        .await
        .unwrap();

    test.blobs.fail_puts(true);
    let report = app.drainer().drain_once().await;
    assert_eq!(report.batches_restored, 1);
    assert_eq!(report.restore_failures, 0);
    assert_eq!(test.count("R7", "U2"), Some(3));

    test.blobs.fail_puts(false);
    test.clock.advance(chrono::Duration::minutes(30));
    let report = app.drainer().drain_once().await;
    assert_eq!(report.units_archived, 3);
    assert_eq!(test.count("R7", "U2"), None);
    assert_eq!(test.archived_total(ARCHIVE_BUCKET), 3);

    app.shutdown().await;
}

#[tokio::test]
async fn successive_cycles_never_archive_a_unit_twice() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;

    let mut recorded = 0;
    for cycle in 0..6u64 {
        let key = counter_key(&format!("R{}", cycle % 2), "U2");
        test.counters.incr_by(&key, cycle + 1).await.unwrap();
        recorded += cycle + 1;

        // A failing cycle in the middle must not duplicate anything.
        test.blobs.fail_puts(cycle == 3);
        test.clock.advance(chrono::Duration::minutes(30));
        app.drainer().drain_once().await;
    }
    test.blobs.fail_puts(false);
    app.drainer().drain_once().await;

    assert_eq!(test.archived_total(ARCHIVE_BUCKET), recorded);
    assert!(test.counters.snapshot().is_empty());

    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_drainers_never_double_count() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;
    let backends = test.backends();

    let rival = Arc::new(ArchivalDrainer::new(
        backends.counters.clone(),
        backends.blobs.clone(),
        test.clock.clone(),
        DrainConfig::default(),
    ));

    let mut recorded = 0u64;
    for round in 0..20u64 {
        for subject in ["U1", "U2", "U3"] {
            test.counters
                .incr_by(&counter_key("R7", subject), round + 1)
                .await
                .unwrap();
            recorded += round + 1;
        }

        let ours = app.drainer().drain_once();
        let theirs = {
            let rival = Arc::clone(&rival);
            tokio::spawn(async move { rival.drain_once().await })
        };
        let (ours, theirs) = tokio::join!(ours, theirs);
        let theirs = theirs.unwrap();

        for report in [&ours, &theirs] {
            if let Some(reason) = report.skipped {
                assert_eq!(reason, SkipReason::LeaseHeld);
            }
        }
        test.clock.advance(chrono::Duration::seconds(1));
    }

    // Whatever a skipped drainer left behind is picked up here.
    app.drainer().drain_once().await;

    let mut per_key: BTreeMap<String, u64> = BTreeMap::new();
    for (name, entries) in test.archived(ARCHIVE_BUCKET) {
        let subject = name.split('/').next().unwrap().to_string();
        for entry in entries {
            *per_key
                .entry(format!("{}:{}", entry.resource, subject))
                .or_default() += entry.access_count;
        }
    }
    assert_eq!(per_key.values().sum::<u64>(), recorded);
    for subject in ["U1", "U2", "U3"] {
        assert_eq!(per_key[&format!("R7:{}", subject)], (1..=20).sum::<u64>());
    }

    app.shutdown().await;
}

#[tokio::test]
async fn unreachable_counter_store_skips_cycle() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;
    test.counters
        .incr_by(&counter_key("R7", "U2"), 2)
        .await
        .unwrap();

    test.counters.set_unavailable(true);
    let report = app.drainer().drain_once().await;
    assert_eq!(report.skipped, Some(SkipReason::StoreUnreachable));

    test.counters.set_unavailable(false);
    assert_eq!(test.count("R7", "U2"), Some(2));

    app.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_flushes_meter_then_drains() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;

    for _ in 0..5 {
        let (resource, subject) = ids("R1", "U9");
        app.meter().record(resource, subject);
    }

    let report = app.shutdown().await.unwrap();
    assert_eq!(report.units_archived, 5);
    assert_eq!(test.archived_total(ARCHIVE_BUCKET), 5);
}

#[tokio::test]
async fn shutdown_without_final_drain_leaves_counters() {
    let test = TestBackends::new();
    let config = AppConfig::default()
        .with_drain(DrainConfig::default().with_drain_on_shutdown(false));
    let app = start(&test, config).await;

    let (resource, subject) = ids("R1", "U9");
    app.meter().record(resource, subject);

    assert!(app.shutdown().await.is_none());
    assert_eq!(test.count("R1", "U9"), Some(1));
    assert!(test.archived(ARCHIVE_BUCKET).is_empty());
}

#[tokio::test]
async fn startup_provisions_archive_bucket() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;

    test.counters
        .incr_by(&counter_key("R7", "U2"), 1)
        .await
        .unwrap();
    let report = app.drainer().drain_once().await;
    assert_eq!(report.batches_uploaded(), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn startup_fails_when_buckets_cannot_be_provisioned() {
    let test = TestBackends::new();
    test.blobs.set_unavailable(true);

    let result =
        AppContext::start_with_clock(AppConfig::default(), test.backends(), test.clock.clone())
            .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn archive_body_round_trips_through_batch_parser() {
    let test = TestBackends::new();
    let app = start(&test, AppConfig::default()).await;
    test.counters
        .incr_by(&counter_key("R7", "U2"), 12)
        .await
        .unwrap();
    app.drainer().drain_once().await;

    let object = &test.blobs.objects_in(ARCHIVE_BUCKET)[0];
    let entries = ArchivalBatch::parse_entries(&object.body).unwrap();
    assert_eq!(entries[0].last_synced, test.clock.now());

    app.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn drains_conserve_every_recorded_access(plan in access_plan(24)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (expected, archived, remaining) = rt.block_on(async {
            let test = TestBackends::new();
            let config =
                AppConfig::default().with_meter(MeterConfig::default().with_queue_capacity(4096));
            let app = start(&test, config).await;

            let mut expected: BTreeMap<String, u64> = BTreeMap::new();
            for access in &plan {
                for _ in 0..access.count {
                    let (resource, subject) = ids(&access.resource, &access.subject);
                    app.meter().record(resource, subject);
                }
                *expected
                    .entry(counter_key(&access.resource, &access.subject))
                    .or_default() += access.count;
            }
            app.meter().shutdown().await;
            app.drainer().drain_once().await;

            let archived = test.archived_total(ARCHIVE_BUCKET);
            let remaining = test.counters.snapshot().len();
            app.shutdown().await;
            (expected, archived, remaining)
        });

        prop_assert_eq!(archived, expected.values().sum::<u64>());
        prop_assert_eq!(remaining, 0);
    }
}
