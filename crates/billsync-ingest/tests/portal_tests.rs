//! Portal client tests against a mock portal
//!
//! Covers login, the listing request body, record extraction from the
//! response shapes the portal has been seen to return, and retries.

use billsync_common::types::{CollectionKind, SyncCursor};
use billsync_ingest::collection::profile;
use billsync_ingest::config::PortalConfig;
use billsync_ingest::portal::{ListingRequest, ListingSource, PortalClient, PortalSession};
use billsync_ingest::retry::RetryPolicy;
use billsync_ingest::sync::{PageFetcher, StopReason, SyncMode, SyncResolver};
use billsync_ingest::PortalError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN: &str = "/suthra-punjab/backend/public/api/login";
const LISTING: &str = "/suthra-punjab/backend/public/api/autoform/get-item-listing";
const DESIGNATION: &str = "/suthra-punjab/backend/public/api/hrmis/set-active-designation";

fn portal_config(server: &MockServer) -> PortalConfig {
    PortalConfig {
        base_host: server.uri(),
        cnic: "3520200000000".to_string(),
        password: "secret".to_string(),
        fetch_max_attempts: 3,
        fetch_retry_delay_ms: 10,
        timeout_secs: 5,
        ..PortalConfig::default()
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "data": { "token": "test-token" }
        })))
        .mount(server)
        .await;
}

async fn session(server: &MockServer) -> PortalSession {
    mount_login(server).await;
    PortalClient::new(portal_config(server))
        .expect("client")
        .login()
        .await
        .expect("login")
}

/// Listing page for `page` holding records with the given ids
async fn mount_page(server: &MockServer, page: u32, ids: &[i64]) {
    let records: Vec<Value> = ids.iter().map(|id| json!({ "id": id, "psid": format!("P{id}") })).collect();
    Mock::given(method("POST"))
        .and(path(LISTING))
        .and(body_partial_json(json!({ "page": page })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "listings": records, "totalInDB": 2 }
        })))
        .mount(server)
        .await;
}

fn request<'a>(filters: &'a BTreeMap<String, String>, page: u32) -> ListingRequest<'a> {
    ListingRequest {
        profile: profile(CollectionKind::Bills),
        filters,
        page,
        size: 2,
    }
}

#[tokio::test]
async fn test_login_rejected_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = PortalClient::new(portal_config(&server))
        .unwrap()
        .login()
        .await
        .err()
        .expect("login should fail");

    assert!(matches!(err, PortalError::Auth(_)));
}

#[tokio::test]
async fn test_login_without_token_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .mount(&server)
        .await;

    let result = PortalClient::new(portal_config(&server)).unwrap().login().await;
    assert!(matches!(result, Err(PortalError::Auth(_))));
}

#[tokio::test]
async fn test_missing_credentials_never_reach_the_portal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = PortalConfig {
        password: String::new(),
        ..portal_config(&server)
    };
    let result = PortalClient::new(config).unwrap().login().await;
    assert!(matches!(result, Err(PortalError::Auth(_))));
}

#[tokio::test]
async fn test_listing_request_body() {
    let server = MockServer::start().await;
    let session = session(&server).await;

    Mock::given(method("POST"))
        .and(path(LISTING))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "slug": "suthra-punjab-bills",
            "id": "0",
            "page": 1,
            "size": 2,
            "sorting": "",
            "requesting_url": "/suthra-billing/view/suthra-punjab-bills",
            "filters_data": { "status": "PAID", "division_id": "9", "uc_id": "" },
            "user_type": "contractor",
            "plateform": "web"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "listings": [{ "id": 105 }, { "id": 104 }], "totalInDB": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filters = BTreeMap::from([
        ("status".to_string(), "PAID".to_string()),
        ("division_id".to_string(), "9".to_string()),
    ]);
    let page = session.fetch_listing(&request(&filters, 1)).await.unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total, Some(2));
}

#[tokio::test]
async fn test_listing_shapes() {
    let shapes = [
        (json!({ "data": { "items": [{ "id": 1 }] } }), 1),
        (json!({ "data": { "records": [{ "id": 1 }, { "id": 2 }] } }), 2),
        (json!({ "data": [{ "id": 1 }] }), 1),
        (json!({ "data": { "rows": [{ "survey_id": 9 }] } }), 1),
        (json!({ "data": { "message": "nothing here" } }), 0),
        (json!({ "error": "unexpected" }), 0),
    ];

    for (body, expected) in shapes {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("POST"))
            .and(path(LISTING))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .mount(&server)
            .await;

        let filters = BTreeMap::new();
        let page = session.fetch_listing(&request(&filters, 1)).await.unwrap();
        assert_eq!(page.records.len(), expected, "shape {body}");
    }
}

#[tokio::test]
async fn test_non_json_listing_is_an_empty_page() {
    let server = MockServer::start().await;
    let session = session(&server).await;
    Mock::given(method("POST"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let filters = BTreeMap::new();
    let page = session.fetch_listing(&request(&filters, 1)).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn test_fetcher_retries_server_errors() {
    let server = MockServer::start().await;
    let session = session(&server).await;

    Mock::given(method("POST"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_page(&server, 1, &[105, 104]).await;

    let fetcher = PageFetcher::new(&session, RetryPolicy::fixed(3, Duration::from_millis(5)));
    let filters = BTreeMap::new();
    let page = fetcher.fetch(profile(CollectionKind::Bills), &filters, 1, 2).await;

    assert!(!page.failed);
    assert_eq!(page.records.len(), 2);
}

#[tokio::test]
async fn test_fetcher_gives_up_and_reports_failed_page() {
    let server = MockServer::start().await;
    let session = session(&server).await;

    Mock::given(method("POST"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = PageFetcher::new(&session, RetryPolicy::fixed(3, Duration::from_millis(5)));
    let filters = BTreeMap::new();
    let page = fetcher.fetch(profile(CollectionKind::Bills), &filters, 1, 2).await;

    assert!(page.failed);
    assert!(page.is_empty);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    let session = session(&server).await;

    Mock::given(method("POST"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = PageFetcher::new(&session, RetryPolicy::fixed(3, Duration::from_millis(5)));
    let filters = BTreeMap::new();
    let page = fetcher.fetch(profile(CollectionKind::Bills), &filters, 1, 2).await;
    assert!(page.failed);
}

#[tokio::test]
async fn test_fresh_sync_stops_at_first_empty_page() {
    let server = MockServer::start().await;
    let session = session(&server).await;
    mount_page(&server, 1, &[105, 104]).await;
    mount_page(&server, 2, &[]).await;
    Mock::given(method("POST"))
        .and(path(LISTING))
        .and(body_partial_json(json!({ "page": 3 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = SyncResolver::new(&session, RetryPolicy::none(), 2);
    let filters = BTreeMap::new();
    let pull = resolver
        .sync("bills", profile(CollectionKind::Bills), &filters, &SyncCursor::default())
        .await
        .unwrap();

    assert_eq!(pull.mode, SyncMode::Fresh);
    assert_eq!(pull.records.len(), 2);
    assert_eq!(pull.pages_requested, 2);
    assert_eq!(pull.stop, StopReason::Exhausted);
    assert_eq!(pull.max_seen_id, Some(105));
}

#[tokio::test]
async fn test_peek_failure_is_an_error_not_up_to_date() {
    let server = MockServer::start().await;
    let session = session(&server).await;
    Mock::given(method("POST"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = SyncResolver::new(&session, RetryPolicy::none(), 2);
    let filters = BTreeMap::new();
    let result = resolver
        .sync("bills", profile(CollectionKind::Bills), &filters, &SyncCursor::new(100, 10))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_designation_switch() {
    let server = MockServer::start().await;
    let session = session(&server).await;
    Mock::given(method("POST"))
        .and(path(DESIGNATION))
        .and(body_partial_json(json!({ "designation_id": 160449 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DESIGNATION))
        .and(body_partial_json(json!({ "designation_id": 1 })))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    session.switch_designation(160449).await.unwrap();
    let err = session.switch_designation(1).await.unwrap_err();
    assert!(matches!(err, PortalError::Designation { designation_id: 1, .. }));
}
