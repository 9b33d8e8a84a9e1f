use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

use crate::bus::event_types::{PreferencesLoaded, TOPIC_PREFERENCES_LOADED};
use crate::bus::EventBus;
use crate::config::SoaConfig;
use crate::context::ContextStore;
use crate::soa::{
    partial_error_messages, PreferenceStore, RequestService, SoaClient, SoaError,
    SoaPreferenceStore,
};

fn client_for(server: &MockServer) -> SoaClient {
    SoaClient::new(&SoaConfig {
        base_url: server.base_url(),
        timeout_ms: 5_000,
    })
    .expect("soa client should initialize")
}

#[tokio::test]
async fn client_wraps_input_in_envelope_and_returns_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/tc/JsonRestServices/Internal-Notification-2015-10-MessageManagement/getUnreadMessages")
            .header("content-type", "application/json")
            .body_contains("\"header\"")
            .body_contains("\"clientID\"")
            .body_contains("\"body\":{\"limit\":5}");
        then.status(200).json_body(json!({
            "messages": [{ "uid": "m1" }, { "uid": "m2" }]
        }));
    });

    let client = client_for(&server);
    let response = client
        .post(
            "Internal-Notification-2015-10-MessageManagement",
            "getUnreadMessages",
            json!({ "limit": 5 }),
        )
        .await
        .expect("request should succeed");

    mock.assert();
    assert_eq!(response["messages"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn client_maps_http_failure_to_status_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/tc/JsonRestServices/Svc/op");
        then.status(503).body("maintenance");
    });

    let err = client_for(&server)
        .post_unchecked("Svc", "op", json!({}))
        .await
        .unwrap_err();
    match err {
        SoaError::Status { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn client_surfaces_service_exception() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/tc/JsonRestServices/Svc/op");
        then.status(200).json_body(json!({
            ".QName": "http://teamcenter.com/Schemas/Soa/2006-03/Exceptions.InvalidUserException",
            "messages": [{ "message": "session expired", "code": 1 }]
        }));
    });

    let err = client_for(&server)
        .post_unchecked("Svc", "op", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SoaError::Service(ref m) if m == "session expired"));
}

#[tokio::test]
async fn checked_post_rejects_partial_errors_but_unchecked_returns_them() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/tc/JsonRestServices/Svc/op");
        then.status(200).json_body(json!({
            "plain": ["a"],
            "partialErrors": [
                { "errorValues": [{ "message": "no write access", "code": 515001 }] }
            ]
        }));
    });

    let client = client_for(&server);
    let raw = client
        .post_unchecked("Svc", "op", json!({}))
        .await
        .expect("unchecked returns the response");
    assert_eq!(partial_error_messages(&raw), vec!["no write access"]);

    let err = client.post("Svc", "op", json!({})).await.unwrap_err();
    assert!(matches!(err, SoaError::PartialErrors(ref m) if m.len() == 1));
}

#[test]
fn partial_errors_are_read_from_service_data_too() {
    let response = json!({
        "ServiceData": {
            "partialErrors": [
                { "errorValues": [{ "message": "first" }, { "message": "second" }] }
            ]
        }
    });
    assert_eq!(partial_error_messages(&response), vec!["first", "second"]);
    assert!(partial_error_messages(&json!({ "plain": [] })).is_empty());
}

#[test]
fn client_rejects_bad_config() {
    assert!(SoaClient::new(&SoaConfig {
        base_url: " ".to_string(),
        timeout_ms: 1_000,
    })
    .is_err());
    assert!(SoaClient::new(&SoaConfig {
        base_url: "http://localhost:7001".to_string(),
        timeout_ms: 0,
    })
    .is_err());
}

#[tokio::test]
async fn preference_store_loads_caches_and_announces() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/tc/JsonRestServices/Administration-2012-09-PreferenceManagement/getPreferences")
            .body_contains("\"preferenceNames\":[\"*\"]");
        then.status(200).json_body(json!({
            "response": [
                {
                    "definition": { "name": "AWS_Notifications_Polling_Interval" },
                    "values": { "values": ["5"] }
                },
                {
                    "definition": { "name": "AWC_Autosave" },
                    "values": { "values": ["true"] }
                }
            ]
        }));
    });

    let bus = Arc::new(EventBus::new());
    let ctx = Arc::new(ContextStore::new(bus.clone()));
    let announced = Arc::new(Mutex::new(None));
    {
        let announced = announced.clone();
        bus.subscribe_typed::<PreferencesLoaded, _>(
            move |loaded| {
                *announced.lock().unwrap() = Some(loaded.names);
                Ok(())
            },
            None,
        );
    }

    let store = SoaPreferenceStore::new(Arc::new(client_for(&server)), ctx.clone())
        .with_overrides(HashMap::from([(
            "AWC_Autosave".to_string(),
            "false".to_string(),
        )]));

    assert_eq!(
        store
            .get_string_value("AWS_Notifications_Polling_Interval")
            .await
            .unwrap(),
        None
    );

    let count = store.load(&["*"]).await.expect("load should succeed");
    mock.assert();
    assert_eq!(count, 2);
    assert!(store.is_loaded());
    assert_eq!(
        store
            .get_string_value("AWS_Notifications_Polling_Interval")
            .await
            .unwrap()
            .as_deref(),
        Some("5")
    );
    assert_eq!(
        store.get_string_value("AWC_Autosave").await.unwrap().as_deref(),
        Some("false")
    );
    assert_eq!(
        ctx.get_path("preferences.AWC_Autosave.0"),
        Some(json!("true"))
    );
    assert_eq!(bus.subscriber_count(TOPIC_PREFERENCES_LOADED), 1);
    assert_eq!(announced.lock().unwrap().as_ref().map(Vec::len), Some(2));
}
