use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{ProviderIdentity, TestMode};

/// Tests one provider and reports whether it is reachable.
///
/// Implementations must not fail: every error is folded into the returned flag.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, provider: &ProviderIdentity, mode: TestMode) -> bool;
}

/// Reachability prober over plain HTTP GET.
///
/// The response is never inspected: any completed exchange counts as reachable,
/// and so does any transport error other than the timeout. A request that is
/// still pending when the timeout fires is the only failure.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpProber {
    pub fn new(timeout: Option<Duration>) -> Self {
        if timeout.is_none() {
            warn!("Probe timeout disabled: unresponsive endpoints will hold their probe open indefinitely");
        }
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn ping(&self, provider: &ProviderIdentity) -> bool {
        let url = provider.probe_url();
        let request = self.client.get(&url).send();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("{}: probe timed out after {:?}", provider.id, limit);
                    return false;
                }
            },
            None => request.await,
        };

        match result {
            Ok(response) => {
                debug!("{}: reachable ({})", provider.id, response.status());
                true
            }
            Err(e) if e.is_timeout() => {
                debug!("{}: transport timeout: {}", provider.id, e);
                false
            }
            Err(e) => {
                debug!("{}: opaque error counted as reachable: {}", provider.id, e);
                true
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, provider: &ProviderIdentity, mode: TestMode) -> bool {
        match mode {
            TestMode::Ping => self.ping(provider).await,
            // Extension points: both run the reachability probe until they get requests of their own.
            TestMode::Simple | TestMode::Full => {
                debug!("{}: {} mode runs the reachability probe", provider.id, mode);
                self.ping(provider).await
            }
        }
    }
}
