use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use slog::{warn, Logger};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::actor::{ActorPath, AskError};

/// The reply to an ask, moved to the waiter as-is and downcast there.
pub(crate) type ReplyPayload = Box<dyn Any + Send>;

pub(crate) type AskResult = Result<ReplyPayload, AskError>;

struct AskWaiter {
    tx: oneshot::Sender<AskResult>,
    timer: JoinHandle<()>,
    path: ActorPath,
}

/// Process-wide table of pending asks, keyed by correlation id.
///
/// Every waiter is resolved, rejected or timed out exactly once: timer
/// firing and reply arrival race on removing the entry, and whichever
/// wins delivers and cancels the other.
#[derive(Clone)]
pub(crate) struct AskRegistry {
    inner: Arc<AskRegistryInner>,
}

struct AskRegistryInner {
    waiters: DashMap<Uuid, AskWaiter>,
    handle: Handle,
    log: Logger,
}

impl AskRegistry {
    pub(crate) fn new(handle: Handle, log: Logger) -> Self {
        AskRegistry {
            inner: Arc::new(AskRegistryInner {
                waiters: DashMap::new(),
                handle,
                log,
            }),
        }
    }

    /// Registers a waiter under a fresh correlation id and arms its
    /// timeout.
    pub(crate) fn register(
        &self,
        id: Uuid,
        path: ActorPath,
        timeout: Duration,
    ) -> oneshot::Receiver<AskResult> {
        let (tx, rx) = oneshot::channel();

        let registry = self.clone();
        let timer = self.inner.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.expire(id);
        });

        self.inner.waiters.insert(id, AskWaiter { tx, timer, path });
        rx
    }

    fn expire(&self, id: Uuid) {
        if let Some((_, waiter)) = self.inner.waiters.remove(&id) {
            let _ = waiter.tx.send(Err(AskError::Timeout {
                correlation_id: id,
                path: waiter.path,
            }));
        }
    }

    /// Resolves or rejects the waiter for `id`. A reply whose
    /// correlation id is unknown is dropped with a warning: its waiter
    /// timed out, was already answered, or never existed.
    pub(crate) fn complete(&self, id: Uuid, result: AskResult) {
        match self.inner.waiters.remove(&id) {
            Some((_, waiter)) => {
                waiter.timer.abort();
                let _ = waiter.tx.send(result);
            }
            None => {
                warn!(
                    self.inner.log,
                    "Dropping reply for unknown correlation id: {}", id
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.inner.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorPath;

    fn registry() -> AskRegistry {
        let log = Logger::root(slog::Discard, slog::o!());
        AskRegistry::new(Handle::current(), log)
    }

    #[tokio::test]
    async fn reply_resolves_waiter_once() {
        let asks = registry();
        let id = Uuid::new_v4();
        let rx = asks.register(id, ActorPath::new("/user/a"), Duration::from_secs(5));

        asks.complete(id, Ok(Box::new("pong".to_string())));

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(*reply.downcast::<String>().unwrap(), "pong");
        assert_eq!(asks.pending(), 0);

        // late duplicate is dropped, not delivered anywhere
        asks.complete(id, Ok(Box::new("again".to_string())));
    }

    #[tokio::test]
    async fn timeout_rejects_waiter() {
        let asks = registry();
        let id = Uuid::new_v4();
        let rx = asks.register(id, ActorPath::new("/user/slow"), Duration::from_millis(20));

        match rx.await.unwrap() {
            Err(AskError::Timeout {
                correlation_id,
                path,
            }) => {
                assert_eq!(correlation_id, id);
                assert_eq!(path.as_str(), "/user/slow");
            }
            _ => panic!("expected timeout"),
        }
        assert_eq!(asks.pending(), 0);
    }

    #[tokio::test]
    async fn reply_cancels_timer() {
        let asks = registry();
        let id = Uuid::new_v4();
        let rx = asks.register(id, ActorPath::new("/user/a"), Duration::from_millis(20));

        asks.complete(id, Ok(Box::new(1u32)));
        tokio::time::sleep(Duration::from_millis(40)).await;

        // the timer fired after resolution and must not have delivered
        let reply = rx.await.unwrap();
        assert!(reply.is_ok());
    }
}
