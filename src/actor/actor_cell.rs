use std::collections::HashMap;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, RwLock,
};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    actor::{
        Actor, ActorRef, ActorRefFactory, ActorReference, BasicActorRef, BoxActorProd,
        CreateError, Sender, Strategy,
    },
    kernel::mailbox::{AnySender, MailboxSender},
    system::{ActorSystem, ScheduleId, SystemCmd, SystemMsg, Timer},
    AnyMessage, AskRequest, Envelope, Message,
};

use super::ActorUri;

/// Lifecycle of a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorStatus {
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
}

#[derive(Clone)]
pub struct ActorCell {
    inner: Arc<ActorCellInner>,
}

struct ActorCellInner {
    uri: ActorUri,
    parent: Option<BasicActorRef>,
    children: Children,
    status: watch::Sender<ActorStatus>,
    status_rx: watch::Receiver<ActorStatus>,
    is_guardian: bool,
    strategy: Strategy,
    stop_requested: AtomicBool,
    sys_tx: mpsc::UnboundedSender<Envelope<SystemMsg>>,
    any_sender: Arc<dyn AnySender>,
    task: Mutex<Option<JoinHandle<()>>>,
    system: ActorSystem,
}

impl ActorCell {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        uri: ActorUri,
        parent: Option<BasicActorRef>,
        strategy: Strategy,
        is_guardian: bool,
        sys_tx: mpsc::UnboundedSender<Envelope<SystemMsg>>,
        any_sender: Arc<dyn AnySender>,
        system: &ActorSystem,
    ) -> ActorCell {
        let (status, status_rx) = watch::channel(ActorStatus::Starting);

        ActorCell {
            inner: Arc::new(ActorCellInner {
                uri,
                parent,
                children: Children::new(),
                status,
                status_rx,
                is_guardian,
                strategy,
                stop_requested: AtomicBool::new(false),
                sys_tx,
                any_sender,
                task: Mutex::new(None),
                system: system.clone(),
            }),
        }
    }

    pub(crate) fn uri(&self) -> &ActorUri {
        &self.inner.uri
    }

    pub(crate) fn path(&self) -> &super::ActorPath {
        &self.inner.uri.path
    }

    pub(crate) fn is_root(&self) -> bool {
        self.inner.uri.path.is_root()
    }

    pub(crate) fn is_guardian(&self) -> bool {
        self.inner.is_guardian
    }

    pub(crate) fn strategy(&self) -> &Strategy {
        &self.inner.strategy
    }

    pub(crate) fn parent_opt(&self) -> Option<BasicActorRef> {
        self.inner.parent.clone()
    }

    pub(crate) fn parent(&self) -> BasicActorRef {
        self.inner
            .parent
            .clone()
            .expect("root cell has no parent")
    }

    pub(crate) fn user_root(&self) -> BasicActorRef {
        self.inner.system.user_root()
    }

    pub(crate) fn system(&self) -> &ActorSystem {
        &self.inner.system
    }

    pub(crate) fn status(&self) -> ActorStatus {
        *self.inner.status_rx.borrow()
    }

    pub(crate) fn set_status(&self, status: ActorStatus) {
        self.inner.status.send_replace(status);
    }

    /// Resolves once the cell reaches `Stopped`. Used by stop barriers
    /// and shard handoff.
    pub(crate) async fn await_stopped(&self) {
        let mut rx = self.inner.status_rx.clone();
        loop {
            if *rx.borrow() == ActorStatus::Stopped {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Marks the stop as requested. Returns true if it already was,
    /// making `stop` idempotent.
    pub(crate) fn swap_stop_requested(&self) -> bool {
        self.inner.stop_requested.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn add_child(&self, actor: BasicActorRef) {
        self.inner.children.add(actor.name(), actor.clone());
    }

    pub(crate) fn remove_child(&self, name: &str) {
        self.inner.children.remove(name);
    }

    pub(crate) fn children_refs(&self) -> Vec<BasicActorRef> {
        self.inner.children.to_vec()
    }

    pub(crate) fn has_children(&self) -> bool {
        self.inner.children.count() > 0
    }

    pub(crate) fn is_child(&self, actor: &BasicActorRef) -> bool {
        self.inner
            .children
            .to_vec()
            .iter()
            .any(|child| child == actor)
    }

    pub(crate) fn send_sys_msg(&self, msg: Envelope<SystemMsg>) -> Result<(), ()> {
        self.inner.sys_tx.send(msg).map_err(|_| ())
    }

    pub(crate) async fn send_any_msg(
        &self,
        msg: &mut AnyMessage,
        sender: Sender,
        ask: Option<AskRequest>,
    ) -> Result<(), ()> {
        self.inner
            .any_sender
            .try_any_enqueue(msg, sender, ask)
            .await
            .map_err(|_| ())
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        *self.inner.task.lock().unwrap() = Some(task);
    }

    /// Forced termination; only used when a shutdown phase overruns its
    /// budget.
    pub(crate) fn abort_task(&self) {
        if let Some(task) = self.inner.task.lock().unwrap().take() {
            task.abort();
        }
        self.set_status(ActorStatus::Stopped);
    }
}

impl fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Cell[{:?}]", self.inner.uri)
    }
}

/// A cell plus the typed write side of its mailbox.
#[derive(Clone)]
pub struct ExtendedCell<Msg: Message> {
    cell: ActorCell,
    sender: MailboxSender<Msg>,
}

impl<Msg: Message> ExtendedCell<Msg> {
    pub(crate) fn new(cell: ActorCell, sender: MailboxSender<Msg>) -> Self {
        ExtendedCell { cell, sender }
    }

    pub(crate) fn cell(&self) -> &ActorCell {
        &self.cell
    }

    pub(crate) fn uri(&self) -> &ActorUri {
        self.cell.uri()
    }

    pub(crate) fn path(&self) -> &super::ActorPath {
        self.cell.path()
    }

    pub(crate) fn mailbox_sender(&self) -> &MailboxSender<Msg> {
        &self.sender
    }

    /// Adds the envelope to the mailbox. A rejected envelope is routed
    /// to dead letters and any pending ask is failed immediately.
    pub(crate) async fn send_msg(
        &self,
        env: Envelope<Msg>,
    ) -> crate::actor::MsgResult<Envelope<Msg>> {
        match self.sender.enqueue(env).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let env = e.msg;
                if let Some(ask) = &env.ask {
                    self.cell
                        .system()
                        .asks()
                        .complete(ask.id, Err(crate::actor::AskError::Unreachable));
                }
                self.cell
                    .system()
                    .publish_dead_letter(crate::actor::DeadLetter {
                        msg: format!("{:?}", env.msg),
                        sender: env.sender.clone(),
                        recipient: self.path().clone(),
                    })
                    .await;
                Err(crate::actor::MsgError::new(env))
            }
        }
    }
}

impl<Msg: Message> From<ExtendedCell<Msg>> for ActorCell {
    fn from(cell: ExtendedCell<Msg>) -> ActorCell {
        cell.cell
    }
}

#[derive(Clone)]
pub(crate) struct Children {
    actors: Arc<RwLock<HashMap<String, BasicActorRef>>>,
}

impl Children {
    pub fn new() -> Children {
        Children {
            actors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn add(&self, name: &str, actor: BasicActorRef) {
        self.actors
            .write()
            .unwrap()
            .insert(name.to_string(), actor);
    }

    pub fn remove(&self, name: &str) {
        self.actors.write().unwrap().remove(name);
    }

    pub fn count(&self) -> usize {
        self.actors.read().unwrap().len()
    }

    pub fn to_vec(&self) -> Vec<BasicActorRef> {
        self.actors.read().unwrap().values().cloned().collect()
    }
}

/// Provides context, including the actor system, during actor execution.
///
/// `Context` is passed to an actor's functions, such as `recv`.
///
/// Operations performed are in most cases done so from the actor's
/// perspective. For example, creating a child actor using
/// `ctx.actor_of` will create the child under the current actor within
/// the hierarchy.
pub struct Context<Msg: Message> {
    pub myself: ActorRef<Msg>,
    system: ActorSystem,
    ask_slot: Mutex<Option<AskRequest>>,
}

impl<Msg> Context<Msg>
where
    Msg: Message,
{
    pub(crate) fn new(myself: ActorRef<Msg>, system: ActorSystem) -> Self {
        Context {
            myself,
            system,
            ask_slot: Mutex::new(None),
        }
    }

    /// Returns the `ActorRef` of the current actor.
    pub fn myself(&self) -> ActorRef<Msg> {
        self.myself.clone()
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub(crate) fn set_ask(&self, ask: Option<AskRequest>) {
        *self.ask_slot.lock().unwrap() = ask;
    }

    pub(crate) fn take_ask(&self) -> Option<AskRequest> {
        self.ask_slot.lock().unwrap().take()
    }

    /// Replies to the ask being handled. Returns false when the current
    /// message did not carry an ask correlation (e.g. it was a `tell`).
    pub async fn reply<T: Message>(&self, msg: T) -> bool {
        match self.take_ask() {
            Some(ask) => {
                self.system.respond_ask(ask, Ok(Box::new(msg))).await;
                true
            }
            None => false,
        }
    }

    /// Sends `msg` to `target`, preserving the original sender and any
    /// pending ask correlation, so the reply bypasses this actor.
    pub async fn forward<M, T>(&self, target: &ActorRef<M>, msg: T, sender: Sender)
    where
        M: Message,
        T: Into<M>,
    {
        let env = Envelope {
            msg: msg.into(),
            sender,
            ask: self.take_ask(),
        };
        let _ = target.cell.send_msg(env).await;
    }
}

#[async_trait::async_trait]
impl<Msg> ActorRefFactory for Context<Msg>
where
    Msg: Message,
{
    async fn actor_of<A>(
        &self,
        props: BoxActorProd<A>,
        name: &str,
    ) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor,
    {
        self.system
            .provider()
            .create_actor(props, name, &self.myself.clone().into(), &self.system)
            .await
    }

    fn stop(&self, actor: impl ActorReference) {
        actor.sys_tell(SystemCmd::Stop.into());
    }
}

impl<Msg> Timer for Context<Msg>
where
    Msg: Message,
{
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
        M: Message,
    {
        self.system
            .schedule(initial_delay, interval, receiver, sender, msg)
    }

    fn schedule_once<T, M>(
        &self,
        delay: Duration,
        receiver: ActorRef<M>,
        sender: Sender,
        msg: T,
    ) -> ScheduleId
    where
        T: Message + Into<M>,
        M: Message,
    {
        self.system.schedule_once(delay, receiver, sender, msg)
    }

    fn cancel_schedule(&self, id: Uuid) {
        self.system.cancel_schedule(id)
    }
}
