//! The Application contract: the collaborator owning the live dialog
//! table and runtime defaults. `EndpointOption` is the concrete
//! realization of the abstract "Application defaults".

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dialog::DialogId;
use crate::{Error, Result};

/// Runtime defaults an Application supplies to every Dialog it creates.
#[derive(Debug, Clone)]
pub struct EndpointOption {
    pub user_agent: String,
    pub dialog_closing_delay: std::time::Duration,
}

impl Default for EndpointOption {
    fn default() -> Self {
        Self {
            user_agent: "sipcore/0.1".to_string(),
            dialog_closing_delay: std::time::Duration::from_secs(32),
        }
    }
}

/// A handle any Dialog may hold without owning the registry it lives in
/// (Design Note "Dialog<->Application cycle"): the registry owns
/// Dialogs; Dialogs reach back through this non-owning `Arc`.
pub struct DialogRegistry {
    defaults: EndpointOption,
    dialogs: RwLock<HashMap<DialogId, ()>>,
    runtime: tokio::runtime::Handle,
}

impl DialogRegistry {
    pub fn new(defaults: EndpointOption) -> Arc<Self> {
        Arc::new(Self {
            defaults,
            dialogs: RwLock::new(HashMap::new()),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    pub fn defaults(&self) -> &EndpointOption {
        &self.defaults
    }

    pub async fn insert(&self, id: DialogId) {
        self.dialogs.write().await.insert(id, ());
    }

    /// Replaces `old` with `new` atomically, so re-keying on remote-tag
    /// discovery is observable as a single step.
    pub async fn rekey(&self, old: &DialogId, new: DialogId) {
        let mut dialogs = self.dialogs.write().await;
        dialogs.remove(old);
        dialogs.insert(new, ());
    }

    /// Removes `id`; a missing key is tolerated (close is idempotent).
    pub async fn remove(&self, id: &DialogId) {
        self.dialogs.write().await.remove(id);
    }

    pub async fn contains(&self, id: &DialogId) -> bool {
        self.dialogs.read().await.contains_key(id)
    }

    /// Schedules `delay` from now, returning a handle the caller can
    /// abort. Used by `close_later`.
    pub fn spawn_delayed<F>(&self, delay: std::time::Duration, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }
}

/// Errors surfaced by registry operations that may legitimately fail
/// (e.g. deleting an id that was never inserted).
pub fn not_found(id: &DialogId) -> Error {
    Error::DialogError("not found in registry".to_string(), id.clone())
}

pub type RegistryResult<T> = Result<T>;
