// Integration tests run the whole pipeline over the in-memory broker.
// Tests that need a running RabbitMQ are #[ignore]d.

mod connection_test;
mod fanout_test;
mod pipeline_test;

use std::time::Duration;

use telemetry_mq::ConnectionParams;

pub fn params() -> ConnectionParams {
    ConnectionParams::default()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 2s");
}
