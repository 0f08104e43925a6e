//! Tests for peer fan-out

use super::*;
use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use std::time::Instant;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

fn report(value: serde_json::Value) -> PeerReport {
    PeerReport::try_from(value).unwrap()
}

fn endpoints(hosts: &[&str]) -> Vec<PeerEndpoint> {
    hosts.iter().map(|h| PeerEndpoint::new(*h, 8080)).collect()
}

fn options(timeout_ms: u64) -> FanOutOptions {
    FanOutOptions {
        timeout: Duration::from_millis(timeout_ms),
        max_in_flight: None,
    }
}

fn hostnames(fan_out: &FanOut) -> Vec<String> {
    let mut names: Vec<String> = fan_out
        .reports()
        .filter_map(|r| r.hostname().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_empty_endpoint_list_returns_immediately() {
    let source = MockPeerSource::new();
    let started = Instant::now();

    let fan_out = query_peers(&source, &[], PEER_STATUS_PATH, &options(500)).await;

    assert_eq!(fan_out, FanOut::default());
    assert!(source.calls().is_empty(), "nothing should be dispatched");
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_every_answering_peer_appears_exactly_once() {
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Respond(report(json!({"hostname": "a"})), Duration::from_millis(30)))
        .with_peer("b", MockPeer::Respond(report(json!({"hostname": "b"})), Duration::ZERO))
        .with_peer("c", MockPeer::Respond(report(json!({"hostname": "c"})), Duration::from_millis(10)));

    let fan_out = query_peers(&source, &endpoints(&["a", "b", "c"]), PEER_STATUS_PATH, &options(500)).await;

    assert_eq!(hostnames(&fan_out), vec!["a", "b", "c"]);
    assert!(fan_out.failures.is_empty());
}

#[tokio::test]
async fn test_peers_are_queried_with_ignore_marker() {
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Respond(report(json!({"hostname": "a"})), Duration::ZERO));

    query_peers(&source, &endpoints(&["a"]), PEER_STATUS_PATH, &options(500)).await;

    assert_eq!(source.calls(), vec![("a".to_string(), "/me?ignore".to_string())]);
}

#[tokio::test]
async fn test_wall_time_is_max_not_sum() {
    let delay = Duration::from_millis(200);
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Respond(report(json!({"hostname": "a"})), delay))
        .with_peer("b", MockPeer::Respond(report(json!({"hostname": "b"})), delay))
        .with_peer("c", MockPeer::Respond(report(json!({"hostname": "c"})), delay));

    let started = Instant::now();
    let fan_out = query_peers(&source, &endpoints(&["a", "b", "c"]), PEER_STATUS_PATH, &options(1000)).await;
    let elapsed = started.elapsed();

    assert_eq!(fan_out.responses.len(), 3);
    assert!(
        elapsed < Duration::from_millis(500),
        "three 200ms peers should finish together, took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_hung_peer_is_bounded_by_timeout_and_dropped() {
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Respond(report(json!({"hostname": "a"})), Duration::ZERO))
        .with_peer("b", MockPeer::Hang);

    let started = Instant::now();
    let fan_out = query_peers(&source, &endpoints(&["a", "b"]), PEER_STATUS_PATH, &options(100)).await;
    let elapsed = started.elapsed();

    assert_eq!(hostnames(&fan_out), vec!["a"]);
    assert_eq!(
        fan_out.failures,
        vec![PeerFailure {
            endpoint: PeerEndpoint::new("b", 8080),
            kind: PeerFailureKind::Timeout(Duration::from_millis(100)),
        }]
    );
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_failing_peers_produce_no_reports() {
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Fail(PeerFailureKind::Status(503)))
        .with_peer("b", MockPeer::Fail(PeerFailureKind::MalformedBody("eof".into())))
        .with_peer("c", MockPeer::Respond(report(json!({"hostname": "c"})), Duration::ZERO));

    // "d" has no script: the mock refuses the connection
    let fan_out = query_peers(&source, &endpoints(&["a", "b", "c", "d"]), PEER_STATUS_PATH, &options(500)).await;

    assert_eq!(hostnames(&fan_out), vec!["c"]);
    assert_eq!(fan_out.failures.len(), 3);
    assert!(!fan_out.has_connect_timeout());
}

#[tokio::test]
async fn test_in_flight_cap_limits_concurrency() {
    let delay = Duration::from_millis(100);
    let source = MockPeerSource::new()
        .with_peer("a", MockPeer::Respond(report(json!({"hostname": "a"})), delay))
        .with_peer("b", MockPeer::Respond(report(json!({"hostname": "b"})), delay))
        .with_peer("c", MockPeer::Respond(report(json!({"hostname": "c"})), delay));

    let capped = FanOutOptions {
        timeout: Duration::from_millis(500),
        max_in_flight: Some(1),
    };

    let started = Instant::now();
    let fan_out = query_peers(&source, &endpoints(&["a", "b", "c"]), PEER_STATUS_PATH, &capped).await;

    assert_eq!(fan_out.responses.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test]
fn test_connect_timeout_is_detected() {
    let fan_out = FanOut {
        responses: vec![],
        failures: vec![PeerFailure {
            endpoint: PeerEndpoint::new("a", 8080),
            kind: PeerFailureKind::ConnectTimeout,
        }],
    };
    assert!(fan_out.has_connect_timeout());
}

#[test]
fn test_report_must_be_json_object() {
    let result = PeerReport::try_from(json!(["not", "an", "object"]));
    assert!(matches!(result, Err(PeerFailureKind::MalformedBody(msg)) if msg.contains("an array")));
}

#[test]
fn test_report_accessors() {
    let r = report(json!({"hostname": "pod-1", "calls": 3, "last_line": "Request at 1.0"}));
    assert_eq!(r.hostname(), Some("pod-1"));
    assert_eq!(r.last_line(), Some("Request at 1.0"));
    assert_eq!(r.get("calls"), Some(&json!(3)));

    let bare = report(json!({"calls": 3}));
    assert_eq!(bare.hostname(), None);
    assert_eq!(bare.last_line(), None);
}

/// Start a peer on an ephemeral port serving `router`
async fn spawn_peer(router: Router) -> PeerEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, router).await });
    PeerEndpoint::new("127.0.0.1", port)
}

/// Port nothing listens on
async fn closed_port() -> PeerEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    PeerEndpoint::new("127.0.0.1", port)
}

/// Listener whose accept queue is full, so new connects never complete
///
/// Returns the listener and the queued connections; both must stay alive.
async fn stalled_listener() -> (TcpListener, Vec<TcpStream>, PeerEndpoint) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => break,
        }
    }
    (listener, queued, PeerEndpoint::new("127.0.0.1", addr.port()))
}

#[test]
fn test_connect_budget_is_below_call_timeout() {
    let timeout = Duration::from_millis(300);
    assert_eq!(connect_budget(timeout), Duration::from_millis(225));
    assert!(connect_budget(Duration::from_millis(500)) < Duration::from_millis(500));
}

#[tokio::test]
async fn test_http_stalled_connect_is_connect_timeout() {
    let (_listener, _queued, stalled) = stalled_listener().await;
    let timeout = Duration::from_millis(300);
    let client = HttpPeerClient::new(timeout);

    let direct = client.fetch(&stalled, PEER_STATUS_PATH).await;
    assert_eq!(direct, Err(PeerFailureKind::ConnectTimeout));

    let fan_out = query_peers(&client, &[stalled.clone()], PEER_STATUS_PATH, &options(300)).await;
    assert_eq!(
        fan_out.failures,
        vec![PeerFailure {
            endpoint: stalled,
            kind: PeerFailureKind::ConnectTimeout,
        }]
    );
    assert!(fan_out.has_connect_timeout());
}

#[tokio::test]
async fn test_http_fan_out_against_real_peers() {
    let healthy = spawn_peer(Router::new().route(
        "/me",
        get(|| async { Json(json!({"hostname": "healthy", "calls": 0})) }),
    ))
    .await;
    let erroring = spawn_peer(Router::new().route(
        "/me",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await;
    let garbled = spawn_peer(Router::new().route("/me", get(|| async { "{not json" }))).await;
    let slow = spawn_peer(Router::new().route(
        "/me",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"hostname": "slow"}))
        }),
    ))
    .await;
    let refused = closed_port().await;
    let (_listener, _queued, stalled) = stalled_listener().await;

    let timeout = Duration::from_millis(300);
    let client = HttpPeerClient::new(timeout);
    let peers = vec![
        healthy.clone(),
        erroring.clone(),
        garbled.clone(),
        slow.clone(),
        refused.clone(),
        stalled.clone(),
    ];

    let started = Instant::now();
    let fan_out = query_peers(&client, &peers, PEER_STATUS_PATH, &options(300)).await;

    assert!(started.elapsed() < Duration::from_secs(2), "slow peer must be cut off");
    assert_eq!(hostnames(&fan_out), vec!["healthy"]);

    let kind_of = |endpoint: &PeerEndpoint| {
        fan_out
            .failures
            .iter()
            .find(|f| &f.endpoint == endpoint)
            .map(|f| f.kind.clone())
    };
    assert_eq!(kind_of(&erroring), Some(PeerFailureKind::Status(500)));
    assert!(matches!(kind_of(&garbled), Some(PeerFailureKind::MalformedBody(_))));
    assert_eq!(kind_of(&slow), Some(PeerFailureKind::Timeout(timeout)));
    assert!(matches!(kind_of(&refused), Some(PeerFailureKind::Connect(_))));
    assert_eq!(kind_of(&stalled), Some(PeerFailureKind::ConnectTimeout));
    assert!(fan_out.has_connect_timeout());
}
