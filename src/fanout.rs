//! In-process fan-out, bypassing the broker.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::handler::MessageHandler;

pub type SharedHandler<M> = Arc<dyn MessageHandler<M>>;

fn same_handler<M>(a: &SharedHandler<M>, b: &SharedHandler<M>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Delivers every published message to each registered handler on its own task.
///
/// - Best effort, in memory only
/// - No ordering between handlers
/// - One handler failing or stalling never affects the others
pub struct InProcessPublisher<M> {
    subscribers: RwLock<Vec<SharedHandler<M>>>,
}

impl<M> Default for InProcessPublisher<M> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

impl<M> InProcessPublisher<M>
where
    M: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<SharedHandler<M>>> {
        self.subscribers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<SharedHandler<M>>> {
        self.subscribers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `handler`. The same handler may be registered more than once
    /// and then receives each message once per registration.
    pub fn subscribe(&self, handler: SharedHandler<M>) {
        self.write().push(handler);
    }

    /// Registers `handler` unless it is already registered.
    pub fn subscribe_once(&self, handler: SharedHandler<M>) -> bool {
        let mut subscribers = self.write();
        if subscribers.iter().any(|existing| same_handler(existing, &handler)) {
            return false;
        }
        subscribers.push(handler);
        true
    }

    /// Removes the first registration of `handler`, compared by identity.
    pub fn unsubscribe(&self, handler: &SharedHandler<M>) -> bool {
        let mut subscribers = self.write();
        match subscribers.iter().position(|existing| same_handler(existing, handler)) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    /// Spawns one task per registered handler and returns without waiting.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// [`Dispatch`] detaches the tasks; nothing guarantees they finish before
    /// the process exits.
    pub fn publish(&self, message: M) -> Dispatch {
        let subscribers = self.read().clone();
        debug!(subscribers = subscribers.len(), "Dispatching in-process message");

        let handles = subscribers
            .into_iter()
            .map(|handler| {
                let message = message.clone();
                tokio::spawn(async move {
                    match handler.handle(message).await {
                        Ok(()) => true,
                        Err(e) => {
                            error!("In-process subscriber failed: {:#}", e);
                            false
                        }
                    }
                })
            })
            .collect();

        Dispatch { handles }
    }
}

/// Handles of the tasks spawned by one [`InProcessPublisher::publish`] call.
#[derive(Debug)]
pub struct Dispatch {
    handles: Vec<JoinHandle<bool>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl Dispatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every handler task.
    pub async fn join(self) -> DispatchReport {
        let mut report = DispatchReport::default();
        for handle in self.handles {
            match handle.await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!("In-process subscriber task did not complete: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
