//! Common test utilities for host integration tests.

pub mod mock_transport;

use std::sync::Arc;
use std::time::Duration;

use hearth_lib::config::DashboardConfig;
use hearth_lib::core::UserRef;
use hearth_lib::services::MemoryBackend;
use hearth_lib::DashboardHost;

pub use mock_transport::MockTransport;

/// Config tuned for tests: short widget wait, no minimum wait.
pub fn test_config(manual_trigger: bool, expected: &[&str]) -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.manual_trigger = manual_trigger;
    config.expected_widgets = expected.iter().map(|name| name.to_string()).collect();
    config.widget_wait_timeout_ms = 500;
    config.widget_min_wait_ms = 0;
    config
}

/// A started host over the in-memory demo backend and a mock transport.
pub fn start_host(config: DashboardConfig) -> (DashboardHost, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let backend = Arc::new(MemoryBackend::with_demo_data("photos"));
    let host = DashboardHost::new(config, backend, transport.clone());
    host.start();
    (host, transport)
}

pub fn user(id: &str) -> UserRef {
    UserRef {
        id: id.to_string(),
        email: Some(format!("{id}@family.example")),
        display_name: None,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
