//! Single-subscriber update channel between the scheduler and whatever renders
//! its state.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::models::ProviderSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeEvent {
    /// Probe dispatched; the snapshot shows `testing`.
    Testing,
    /// Probe settled; status and stats already reflect the outcome.
    Complete,
}

impl ProbeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeEvent::Testing => "testing",
            ProbeEvent::Complete => "complete",
        }
    }
}

pub type Listener = dyn Fn(ProbeEvent, &ProviderSnapshot) -> anyhow::Result<()> + Send + Sync;

#[derive(Default)]
pub struct UpdateChannel {
    slot: RwLock<Option<Arc<Listener>>>,
}

impl UpdateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `listener`, replacing any previous one.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(ProbeEvent, &ProviderSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(listener));
    }

    pub fn unsubscribe(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    #[cfg(test)]
    pub fn has_listener(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Delivers one event. Listener errors and panics are logged and swallowed.
    pub fn notify(&self, event: ProbeEvent, snapshot: &ProviderSnapshot) {
        let listener = match self.slot.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(listener) => Arc::clone(listener),
            None => return,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| listener(event, snapshot))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Update listener failed on {} for {}: {:#}", event.as_str(), snapshot.id, e),
            Err(_) => warn!("Update listener panicked on {} for {}", event.as_str(), snapshot.id),
        }
    }
}
