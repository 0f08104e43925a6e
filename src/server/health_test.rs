//! Tests for health endpoints and toggles

use super::test_support::*;
use super::*;
use serde_json::json;

#[tokio::test]
async fn test_probes_return_200_when_healthy() {
    let server = spawn_server(disabled_discovery(), None).await;

    let (status, body) = server.get_json("/healthz/ready").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"hostname": TEST_HOSTNAME, "status": "Ready"}));

    let (status, body) = server.get_json("/healthz/alive").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"hostname": TEST_HOSTNAME, "status": "Alive"}));
}

#[tokio::test]
async fn test_toggle_ready_flips_readiness_probe() {
    let server = spawn_server(disabled_discovery(), None).await;

    let (_, body) = server.get_json("/ready").await;
    assert_eq!(body, json!({"hostname": TEST_HOSTNAME, "New Status": "Not Ready"}));

    let (status, body) = server.get_json("/healthz/ready").await;
    assert_eq!(status, 503, "Readiness probe should return 503 when not ready");
    assert_eq!(body["status"], "Not Ready");

    // Liveness is unaffected
    let (status, _) = server.get_json("/healthz/alive").await;
    assert_eq!(status, 200);

    let (_, body) = server.get_json("/ready").await;
    assert_eq!(body["New Status"], "Ready");
    let (status, _) = server.get_json("/healthz/ready").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_toggle_alive_takes_readiness_with_it() {
    let server = spawn_server(disabled_discovery(), None).await;

    let (_, body) = server.get_json("/alive").await;
    assert_eq!(body, json!({"hostname": TEST_HOSTNAME, "New Status": "Unhealthy"}));

    let (status, body) = server.get_json("/healthz/alive").await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "Dead");
    let (status, _) = server.get_json("/healthz/ready").await;
    assert_eq!(status, 503, "dead pods are not ready");

    let (_, body) = server.get_json("/alive").await;
    assert_eq!(body["New Status"], "Healthy");
    let (status, _) = server.get_json("/healthz/ready").await;
    assert_eq!(status, 200, "revived pods are ready again");
}

#[tokio::test]
async fn test_kill_triggers_shutdown() {
    let server = spawn_server(disabled_discovery(), None).await;
    assert!(!server.shutdown.is_shutdown());

    let (status, body) = server.get_json("/kill").await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"hostname": TEST_HOSTNAME, "status": "Killing..."}));
    assert_eq!(server.shutdown.reason(), Some(ShutdownReason::Kill));
    assert!(!server.state.health.is_ready());
    assert!(server.state.health.is_alive(), "liveness is left alone while draining");
}

#[test]
fn test_health_state_transitions() {
    let state = HealthState::new();
    assert!(state.is_alive());
    assert!(state.is_ready());

    assert!(!state.toggle_ready());
    assert!(!state.is_ready());
    assert!(state.is_alive());

    // Reviving also restores readiness
    assert!(!state.toggle_alive());
    assert!(state.toggle_alive());
    assert!(state.is_ready());

    // Clone should share state
    let cloned = state.clone();
    state.set_not_ready();
    assert!(!cloned.is_ready());
}
