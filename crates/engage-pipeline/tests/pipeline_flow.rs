//! End-to-end behavior of the pipeline through its public API.

use std::sync::Arc;
use std::time::Duration;

use engage_core::intent::SESSION_STARTED_EVENT;
use engage_core::settings::DeviceSettings;
use engage_core::{
    properties, ActivityPayload, EventPayload, Identity, Intent, Properties, PropertyValue,
};
use engage_pipeline::{
    merge, AdmissionPolicy, Analytics, AnalyticsConfig, BatchQueue, IdentityStore,
    MemoryIdentityStore, QueueConfig, RecordingSink, IDENTITY_ATTRIBUTE,
};

const DEBOUNCE: Duration = Duration::from_secs(10);

fn event(name: &str) -> ActivityPayload {
    ActivityPayload::new("acct", "user").with_event(EventPayload::new(name))
}

fn queue(sink: &Arc<RecordingSink>) -> BatchQueue {
    BatchQueue::new(QueueConfig { debounce: DEBOUNCE }, sink.clone()).unwrap()
}

fn analytics_config() -> AnalyticsConfig {
    AnalyticsConfig {
        account_id: "acct".into(),
        application_id: "app".into(),
        debounce: DEBOUNCE,
        session_timeout: Duration::from_secs(1800),
        allow_anonymous: true,
        device: DeviceSettings::default(),
    }
}

#[test]
fn merge_preserves_event_order_and_last_write_wins() {
    let p1 = event("a").with_profile_update(properties! { "a" => 1 });
    let p2 = event("b").with_profile_update(properties! { "a" => 2, "b" => 3 });
    let p3 = event("c");

    let merged = merge(vec![p1, p2, p3]).unwrap();
    assert_eq!(merged.event_names(), vec!["a", "b", "c"]);
    assert_eq!(merged.profile_update, Some(properties! { "a" => 2, "b" => 3 }));
    assert!(merge(Vec::new()).is_none());
}

#[tokio::test(start_paused = true)]
async fn deferred_within_window_is_one_delivery() {
    let sink = Arc::new(RecordingSink::new());
    let q = queue(&sink);

    q.enqueue_deferred(event("A"));
    tokio::time::sleep(DEBOUNCE / 2).await;
    q.enqueue_deferred(event("B"));

    let delivered = sink.wait_for(1).await;
    assert_eq!(delivered[0].event_names(), vec!["A", "B"]);
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn deferred_past_window_is_two_deliveries() {
    let sink = Arc::new(RecordingSink::new());
    let q = queue(&sink);

    q.enqueue_deferred(event("A"));
    tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;
    q.enqueue_deferred(event("B"));
    tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;

    let delivered = sink.deliveries();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].event_names(), vec!["A"]);
    assert_eq!(delivered[1].event_names(), vec!["B"]);
}

#[tokio::test(start_paused = true)]
async fn immediate_bypasses_the_window_and_cancels_the_timer() {
    let sink = Arc::new(RecordingSink::new());
    let q = queue(&sink);

    q.enqueue_deferred(event("A"));
    q.enqueue_immediate(event("B"));

    let delivered = sink.wait_for(1).await;
    assert_eq!(delivered[0].event_names(), vec!["A", "B"]);
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn separate_delivery_is_unmerged() {
    let sink = Arc::new(RecordingSink::new());
    let q = queue(&sink);

    q.enqueue_deferred(event("A"));
    q.flush_then_deliver_separately(event("B"));

    let delivered = sink.wait_for(2).await;
    assert_eq!(delivered[0].event_names(), vec!["A"]);
    assert_eq!(delivered[1], event("B"));
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(sink.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn flushing_an_empty_queue_delivers_nothing() {
    let sink = Arc::new(RecordingSink::new());
    let q = queue(&sink);

    q.flush_all();
    q.flush_all();
    q.shutdown().await;
    assert_eq!(sink.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_start_precedes_the_first_event_in_one_batch() {
    let sink = Arc::new(RecordingSink::new());
    let store: Arc<dyn IdentityStore> =
        Arc::new(MemoryIdentityStore::with_identity(Identity::new("acct", "u-1")));
    let analytics = Analytics::builder(analytics_config(), sink.clone())
        .identity_store(store)
        .build()
        .unwrap();

    analytics.track("checkout", Properties::new(), false);
    let delivered = sink.wait_for(1).await;

    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].event_names(),
        vec![SESSION_STARTED_EVENT, "checkout"]
    );
    assert_eq!(delivered[0].user_id, "u-1");
}

#[tokio::test(start_paused = true)]
async fn events_share_the_session_identity_map() {
    let sink = Arc::new(RecordingSink::new());
    let analytics = Analytics::new(analytics_config(), sink.clone()).unwrap();

    analytics.identify("u-1", Properties::new());
    analytics.screen("Home", Properties::new());
    analytics.track("tap", properties! { "target" => "buy" }, true);
    analytics.shutdown().await;

    let delivered = sink.deliveries();
    let events: Vec<&EventPayload> = delivered
        .iter()
        .flat_map(|p| p.events.iter().flatten())
        .collect();
    let session_ids: Vec<_> = events
        .iter()
        .map(|e| {
            e.attributes[IDENTITY_ATTRIBUTE].as_map().unwrap()["_sessionId"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(session_ids.len(), 3, "session start, screen, tap");
    assert!(session_ids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn wire_json_sanitizes_dates_in_nested_values() {
    let sink = Arc::new(RecordingSink::new());
    let analytics = Analytics::new(analytics_config(), sink.clone()).unwrap();
    let at = chrono::DateTime::parse_from_rfc3339("2024-02-03T04:05:06Z")
        .unwrap()
        .with_timezone(&chrono::Utc);

    analytics.identify("u-1", Properties::new());
    analytics.track(
        "purchase",
        properties! {
            "at" => at,
            "lines" => vec![PropertyValue::Map(properties! { "addedAt" => at })],
            "coupon" => None::<String>,
        },
        true,
    );
    analytics.shutdown().await;

    let last = sink.deliveries().pop().unwrap();
    let json = last.to_json().unwrap();
    let attrs = &json["events"][0]["attributes"];
    let millis = at.timestamp_millis() as f64;
    assert_eq!(attrs["at"].as_f64(), Some(millis));
    assert_eq!(attrs["lines"][0]["addedAt"].as_f64(), Some(millis));
    assert!(attrs.get("coupon").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_deliver_every_event_exactly_once() {
    let sink = Arc::new(RecordingSink::new());
    let q = Arc::new(queue(&sink));

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let q = Arc::clone(&q);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                let policy = if i % 5 == 0 {
                    AdmissionPolicy::Immediate
                } else {
                    AdmissionPolicy::Deferred
                };
                q.enqueue(event(&format!("w{worker}-{i}")), policy);
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    q.shutdown().await;

    let mut names: Vec<String> = sink
        .deliveries()
        .iter()
        .flat_map(|p| p.event_names().into_iter().map(str::to_owned).collect::<Vec<_>>())
        .collect();
    assert_eq!(names.len(), 200);
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 200, "no event may be delivered twice");
}

#[tokio::test(start_paused = true)]
async fn intent_json_drives_the_same_pipeline() {
    let sink = Arc::new(RecordingSink::new());
    let analytics = Analytics::new(analytics_config(), sink.clone()).unwrap();

    let intent: Intent = serde_json::from_value(serde_json::json!({
        "type": "identify",
        "user_id": "u-json",
        "properties": { "plan": "team" }
    }))
    .unwrap();
    analytics.submit(intent, AdmissionPolicy::Separate);

    let delivered = sink.wait_for(2).await;
    assert_eq!(delivered[1].user_id, "u-json");
    assert_eq!(
        delivered[1].profile_update.as_ref().unwrap()["plan"].as_str(),
        Some("team")
    );
}
