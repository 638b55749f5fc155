//! Bounded, time-limited calls to the qualitative advisory service.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::TradedeskError;
use crate::domain::signal::AdvisoryRecord;
use crate::ports::advisory_port::{AdvisoryPort, AdvisoryRequest};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvisoryPolicy {
    /// Limit for a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for AdvisoryPolicy {
    fn default() -> Self {
        AdvisoryPolicy {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct AdvisoryClient {
    port: Option<Arc<dyn AdvisoryPort>>,
    policy: AdvisoryPolicy,
}

impl AdvisoryClient {
    pub fn new(port: Option<Arc<dyn AdvisoryPort>>, policy: AdvisoryPolicy) -> Self {
        AdvisoryClient { port, policy }
    }

    /// A client with no service behind it; every fetch fails fast.
    pub fn disabled() -> Self {
        AdvisoryClient::new(None, AdvisoryPolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.port.is_some()
    }

    /// Ask the service, retrying up to the policy bound.
    ///
    /// The port is synchronous and runs on the blocking pool. A timed-out
    /// call is abandoned rather than cancelled, so it may still finish in
    /// the background; its result is discarded.
    pub async fn fetch(&self, request: &AdvisoryRequest) -> Result<AdvisoryRecord, TradedeskError> {
        let Some(port) = &self.port else {
            return Err(TradedeskError::external("advisory", "no advisory service configured"));
        };

        let attempts = self.policy.retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let port = Arc::clone(port);
            let req = request.clone();
            let call = tokio::task::spawn_blocking(move || port.analyze(&req));

            match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(Ok(Ok(record))) => return Ok(record),
                Ok(Ok(Err(e))) => last_error = e.to_string(),
                Ok(Err(join)) => last_error = format!("advisory task failed: {join}"),
                Err(_) => last_error = format!("timed out after {:?}", self.policy.timeout),
            }
            log::warn!(
                "advisory attempt {attempt}/{attempts} for {} failed: {last_error}",
                request.symbol
            );
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }
        Err(TradedeskError::external("advisory", last_error))
    }
}
