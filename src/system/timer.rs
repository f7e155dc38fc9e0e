use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    actor::{ActorRef, Sender},
    Message,
};

pub type ScheduleId = Uuid;

/// Scheduling of messages to actors, implemented by `ActorSystem` and
/// `Context`.
pub trait Timer {
    /// Sends `msg` to `receiver` after `initial_delay`, then repeatedly
    /// every `interval` until canceled.
    fn schedule<T, M>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        receiver: ActorRef<M>,
        sender: Sender,
        msg: T,
    ) -> ScheduleId
    where
        T: Message + Into<M>,
        M: Message;

    /// Sends `msg` to `receiver` once, after `delay`.
    fn schedule_once<T, M>(
        &self,
        delay: Duration,
        receiver: ActorRef<M>,
        sender: Sender,
        msg: T,
    ) -> ScheduleId
    where
        T: Message + Into<M>,
        M: Message;

    fn cancel_schedule(&self, id: ScheduleId);
}

/// Job runner behind the `Timer` trait: one task per schedule, aborted
/// on cancellation.
#[derive(Clone)]
pub(crate) struct BasicTimer {
    jobs: Arc<DashMap<ScheduleId, JoinHandle<()>>>,
    handle: Handle,
}

impl BasicTimer {
    pub(crate) fn new(handle: Handle) -> Self {
        BasicTimer {
            jobs: Arc::new(DashMap::new()),
            handle,
        }
    }

    pub(crate) fn schedule_job<M>(
        &self,
        initial_delay: Duration,
        interval: Option<Duration>,
        receiver: ActorRef<M>,
        sender: Sender,
        msg: M,
    ) -> ScheduleId
    where
        M: Message,
    {
        let id = Uuid::new_v4();
        let jobs = self.jobs.clone();

        let task = self.handle.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            match interval {
                None => {
                    receiver.send_msg(msg, sender).await;
                    jobs.remove(&id);
                }
                Some(every) => loop {
                    receiver.send_msg(msg.clone(), sender.clone()).await;
                    tokio::time::sleep(every).await;
                },
            }
        });

        self.jobs.insert(id, task);
        id
    }

    pub(crate) fn cancel(&self, id: &ScheduleId) {
        if let Some((_, task)) = self.jobs.remove(id) {
            task.abort();
        }
    }

    pub(crate) fn cancel_all(&self) {
        self.jobs.retain(|_, task| {
            task.abort();
            false
        });
    }
}
