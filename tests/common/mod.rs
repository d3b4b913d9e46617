//! Shared fakes and helpers for integration tests
#![allow(dead_code)]

pub mod channel_connector;
pub mod mock_transport;

#[allow(unused_imports)]
pub use channel_connector::ChannelConnector;
#[allow(unused_imports)]
pub use mock_transport::MockTransport;

use std::time::Duration;
use tokio::sync::broadcast;

use tasker_agent_bridge::config::BridgeConfig;
use tasker_agent_bridge::events::{BridgeEvent, PublishedEvent};

/// Configuration with millisecond-scale delays so tests stay fast
pub fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig {
        request_timeout_ms: 2000,
        ..Default::default()
    };
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.status_retry.initial_delay_ms = 5;
    config.status_retry.max_delay_ms = 20;
    config.circuit_breaker.failure_threshold = 5;
    config.circuit_breaker.reset_timeout_ms = 100;
    config.streaming.reconnect.initial_delay_ms = 10;
    config.streaming.reconnect.max_delay_ms = 40;
    config
}

/// Poll `condition` until it holds, failing the test after ~2 seconds
pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

/// Receive bridge events until one satisfies `predicate`
pub async fn expect_event<F>(
    receiver: &mut broadcast::Receiver<PublishedEvent>,
    predicate: F,
) -> BridgeEvent
where
    F: Fn(&BridgeEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let published = tokio::time::timeout_at(deadline, receiver.recv())
            .await
            .expect("timed out waiting for bridge event")
            .expect("bridge event channel closed");
        if predicate(&published.event) {
            return published.event;
        }
    }
}

/// Drain whatever is already queued on the event channel
pub fn drain_events(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(published) = receiver.try_recv() {
        events.push(published.event);
    }
    events
}
