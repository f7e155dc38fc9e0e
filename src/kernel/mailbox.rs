use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    actor::{ActorReference, BasicActorRef, Sender},
    system::{ActorSystem, SystemMsg},
    AnyMessage, AskRequest, Envelope, Message,
};

/// One slot in an actor's user queue.
///
/// The poison pill is the terminal stop marker: it rides the user queue
/// so that messages enqueued before the stop are still delivered.
#[derive(Debug)]
pub(crate) enum MailboxItem<Msg: Message> {
    Envelope(Envelope<Msg>),
    PoisonPill,
}

#[derive(Debug)]
pub struct AnyEnqueueError;

impl From<()> for AnyEnqueueError {
    fn from(_: ()) -> AnyEnqueueError {
        AnyEnqueueError
    }
}

/// Type-erased enqueue used by timers, channels and remote routing.
#[async_trait]
pub(crate) trait AnySender: Send + Sync {
    async fn try_any_enqueue(
        &self,
        msg: &mut AnyMessage,
        sender: Sender,
        ask: Option<AskRequest>,
    ) -> Result<(), AnyEnqueueError>;

    fn is_closed(&self) -> bool;
}

#[derive(Clone, Debug)]
pub struct EnqueueError<T> {
    pub msg: T,
}

pub type EnqueueResult<Msg> = Result<(), EnqueueError<Envelope<Msg>>>;

#[derive(Clone)]
enum Tx<Msg: Message> {
    Bounded(mpsc::Sender<MailboxItem<Msg>>),
    Unbounded(mpsc::UnboundedSender<MailboxItem<Msg>>),
}

/// Write side of a mailbox. Cheap to clone.
#[derive(Clone)]
pub struct MailboxSender<Msg: Message> {
    tx: Tx<Msg>,
    closed: Arc<AtomicBool>,
}

impl<Msg: Message> MailboxSender<Msg> {
    /// Appends an envelope, suspending while the queue is at capacity.
    /// Fails once the mailbox is closed, handing the envelope back.
    pub(crate) async fn enqueue(&self, env: Envelope<Msg>) -> EnqueueResult<Msg> {
        if self.is_closed() {
            return Err(EnqueueError { msg: env });
        }

        match &self.tx {
            Tx::Bounded(tx) => tx
                .send(MailboxItem::Envelope(env))
                .await
                .map_err(|e| EnqueueError {
                    msg: envelope_of(e.0),
                }),
            Tx::Unbounded(tx) => tx.send(MailboxItem::Envelope(env)).map_err(|e| EnqueueError {
                msg: envelope_of(e.0),
            }),
        }
    }

    /// Enqueues the terminal poison pill. Called from the owning cell's
    /// own run loop, so a full queue must not be awaited here: the send
    /// is completed on a detached task instead.
    pub(crate) fn enqueue_poison(&self, sys: &ActorSystem) {
        match &self.tx {
            Tx::Unbounded(tx) => {
                let _ = tx.send(MailboxItem::PoisonPill);
            }
            Tx::Bounded(tx) => match tx.try_send(MailboxItem::PoisonPill) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(item)) => {
                    let tx = tx.clone();
                    sys.handle().spawn(async move {
                        let _ = tx.send(item).await;
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

fn envelope_of<Msg: Message>(item: MailboxItem<Msg>) -> Envelope<Msg> {
    match item {
        MailboxItem::Envelope(env) => env,
        MailboxItem::PoisonPill => unreachable!("poison pill is never handed back"),
    }
}

#[async_trait]
impl<Msg> AnySender for MailboxSender<Msg>
where
    Msg: Message,
{
    async fn try_any_enqueue(
        &self,
        msg: &mut AnyMessage,
        sender: Sender,
        ask: Option<AskRequest>,
    ) -> Result<(), AnyEnqueueError> {
        let actual = msg.take().map_err(|_| AnyEnqueueError)?;
        let env = Envelope {
            msg: actual,
            sender,
            ask,
        };
        self.enqueue(env).await.map_err(|_| AnyEnqueueError)
    }

    fn is_closed(&self) -> bool {
        MailboxSender::is_closed(self)
    }
}

pub(crate) enum Rx<Msg: Message> {
    Bounded(mpsc::Receiver<MailboxItem<Msg>>),
    Unbounded(mpsc::UnboundedReceiver<MailboxItem<Msg>>),
}

impl<Msg: Message> Rx<Msg> {
    /// Returns the oldest item; suspends while empty, yields `None`
    /// once the mailbox is closed and drained.
    pub(crate) async fn recv(&mut self) -> Option<MailboxItem<Msg>> {
        match self {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<MailboxItem<Msg>> {
        match self {
            Rx::Bounded(rx) => rx.try_recv().ok(),
            Rx::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    fn close(&mut self) {
        match self {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }
}

/// Read side of a mailbox: the user queue plus the priority system
/// queue. Owned by the cell's run loop (single consumer).
pub(crate) struct Mailbox<Msg: Message> {
    pub(crate) rx: Rx<Msg>,
    pub(crate) sys_rx: mpsc::UnboundedReceiver<Envelope<SystemMsg>>,
    closed: Arc<AtomicBool>,
}

impl<Msg: Message> Mailbox<Msg> {
    /// Idempotent. Rejects further enqueues; already queued items stay
    /// deliverable until drained.
    pub(crate) fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        self.rx.close();
    }
}

pub(crate) fn mailbox<Msg>(
    capacity: usize,
) -> (
    MailboxSender<Msg>,
    mpsc::UnboundedSender<Envelope<SystemMsg>>,
    Mailbox<Msg>,
)
where
    Msg: Message,
{
    let closed = Arc::new(AtomicBool::new(false));

    let (tx, rx) = if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (Tx::Unbounded(tx), Rx::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (Tx::Bounded(tx), Rx::Bounded(rx))
    };

    let (sys_tx, sys_rx) = mpsc::unbounded_channel();

    let sender = MailboxSender {
        tx,
        closed: closed.clone(),
    };

    let mailbox = Mailbox { rx, sys_rx, closed };

    (sender, sys_tx, mailbox)
}

/// Routes everything left in a closed mailbox to the dead letters
/// channel, rejecting any pending asks.
pub(crate) async fn flush_to_deadletters<Msg>(
    rx: &mut Rx<Msg>,
    actor: &BasicActorRef,
    sys: &ActorSystem,
) where
    Msg: Message,
{
    while let Some(item) = rx.try_recv() {
        if let MailboxItem::Envelope(Envelope { msg, sender, ask }) = item {
            if let Some(ask) = ask {
                sys.asks()
                    .complete(ask.id, Err(crate::actor::AskError::Unreachable));
            }
            sys.publish_dead_letter(crate::actor::DeadLetter {
                msg: format!("{:?}", msg),
                sender,
                recipient: actor.path().clone(),
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(msg: &str) -> Envelope<String> {
        Envelope::new(msg.to_string(), None)
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (sender, _sys_tx, mut mbox) = mailbox::<String>(8);

        sender.enqueue(envelope("a")).await.unwrap();
        sender.enqueue(envelope("b")).await.unwrap();
        sender.enqueue(envelope("c")).await.unwrap();

        for expected in &["a", "b", "c"] {
            match mbox.rx.recv().await {
                Some(MailboxItem::Envelope(env)) => assert_eq!(&env.msg, expected),
                other => panic!("unexpected item: {:?}", other.is_some()),
            }
        }
    }

    #[tokio::test]
    async fn enqueue_suspends_at_capacity() {
        let (sender, _sys_tx, mut mbox) = mailbox::<String>(1);

        sender.enqueue(envelope("first")).await.unwrap();

        let blocked = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.enqueue(envelope("second")).await })
        };

        // the producer cannot finish until the consumer frees a slot
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert!(matches!(
            mbox.rx.recv().await,
            Some(MailboxItem::Envelope(_))
        ));
        blocked.await.unwrap().unwrap();

        match mbox.rx.recv().await {
            Some(MailboxItem::Envelope(env)) => assert_eq!(env.msg, "second"),
            _ => panic!("expected the blocked envelope"),
        }
    }

    #[tokio::test]
    async fn close_rejects_enqueue_and_drains() {
        let (sender, _sys_tx, mut mbox) = mailbox::<String>(8);

        sender.enqueue(envelope("queued")).await.unwrap();
        mbox.close();

        let rejected = sender.enqueue(envelope("late")).await;
        assert!(rejected.is_err());
        assert_eq!(rejected.unwrap_err().msg.msg, "late");

        // queued items remain deliverable, then end-of-stream
        assert!(matches!(
            mbox.rx.recv().await,
            Some(MailboxItem::Envelope(_))
        ));
        assert!(mbox.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unbounded_mailbox_accepts_without_waiting() {
        let (sender, _sys_tx, mut mbox) = mailbox::<String>(0);

        for i in 0..100 {
            sender.enqueue(envelope(&format!("m{}", i))).await.unwrap();
        }
        match mbox.rx.recv().await {
            Some(MailboxItem::Envelope(env)) => assert_eq!(env.msg, "m0"),
            _ => panic!("expected first envelope"),
        }
    }
}
