use std::sync::Arc;
use std::time::Duration;

use engage_client::{HttpDeliverySink, HttpSinkConfig};
use engage_core::intent::SESSION_STARTED_EVENT;
use engage_core::{properties, Properties};
use engage_pipeline::{Analytics, AnalyticsConfig};
use serde_json::Value;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn analytics_delivers_through_http_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/accounts/acct/users/[^/]+/activity$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sink = HttpDeliverySink::new(HttpSinkConfig {
        api_host: server.uri(),
        timeout: Duration::from_secs(5),
        api_key: None,
    })
    .unwrap();
    let config = AnalyticsConfig {
        account_id: "acct".into(),
        application_id: "app".into(),
        ..AnalyticsConfig::default()
    };
    let analytics = Analytics::new(config, Arc::new(sink)).unwrap();

    analytics.identify("u-1", properties! { "plan" => "pro" });
    analytics.track("added_to_cart", Properties::new(), false);
    analytics.screen("Cart", Properties::new());
    analytics.shutdown().await;

    let bodies: Vec<Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect();
    assert_eq!(bodies.len(), 3);

    assert_eq!(bodies[0]["events"][0]["name"], SESSION_STARTED_EVENT);
    assert_eq!(bodies[1]["profileUpdate"]["plan"], "pro");
    assert!(bodies[1].get("events").is_none(), "identify is delivered unmerged");

    let names: Vec<&str> = bodies[2]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["added_to_cart", "engage:screen_view"]);
    assert_eq!(bodies[2]["userId"], "u-1");
}
