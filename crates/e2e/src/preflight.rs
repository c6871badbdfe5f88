//! Reachability check for the application under test

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::wait::{PollPolicy, Poller};

/// Poll `base_url` until it answers with anything but a server error.
///
/// Fails with [`E2eError::Navigation`] once the policy's deadline passes.
pub async fn wait_until_reachable(base_url: &str, policy: &PollPolicy) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let mut poller = Poller::start(policy);
    loop {
        match client.get(base_url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("Application reachable at {}", base_url);
                return Ok(());
            }
            Ok(resp) => {
                warn!("Reachability check returned {}", resp.status());
            }
            Err(e) => {
                if poller.attempts() == 1 {
                    info!("Waiting for {} to come up...", base_url);
                }
                // Connection refused is expected while the app is starting
                if !e.is_connect() {
                    warn!("Reachability check error: {}", e);
                }
            }
        }

        if !poller.next_attempt().await {
            return Err(E2eError::Navigation(format!(
                "{} unreachable after {} attempts ({} ms)",
                base_url,
                poller.attempts(),
                poller.elapsed_ms()
            )));
        }
    }
}
