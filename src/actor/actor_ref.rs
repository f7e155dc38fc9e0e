use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    actor::{
        actor_cell::{ActorCell, ActorStatus, ExtendedCell},
        Actor, ActorPath, ActorUri, AskError, BoxActorProd, CreateError,
    },
    system::{ActorSystem, SystemMsg},
    AnyMessage, AskRequest, Envelope, Message,
};

pub trait ActorReference {
    /// Actor name.
    ///
    /// Unique among siblings.
    fn name(&self) -> &str;

    /// Actor URI.
    ///
    /// Returns the URI for this actor.
    fn uri(&self) -> &ActorUri;

    /// Actor path.
    ///
    /// e.g. `/user/actor_a/actor_b`
    fn path(&self) -> &ActorPath;

    /// True if this actor is the top level root
    ///
    /// I.e. `/`
    fn is_root(&self) -> bool;

    /// Parent reference
    ///
    /// Returns the `BasicActorRef` of this actor's parent actor
    fn parent(&self) -> BasicActorRef;

    /// User root reference
    ///
    /// I.e. `/user`
    fn user_root(&self) -> BasicActorRef;

    /// True if this actor has any children actors
    fn has_children(&self) -> bool;

    /// True if the given actor is a child of this actor
    fn is_child(&self, actor: &BasicActorRef) -> bool;

    /// Children references.
    fn children(&self) -> Vec<BasicActorRef>;

    /// Send a system message to this actor
    fn sys_tell(&self, msg: SystemMsg);
}

pub type BoxedTell<T> = Box<dyn Tell<T> + Send + Sync + 'static>;

#[async_trait]
pub trait Tell<T>: ActorReference + Send + Sync + 'static {
    async fn tell(&self, msg: T, sender: Sender);
    fn box_clone(&self) -> BoxedTell<T>;
}

#[async_trait]
impl<T, M> Tell<T> for ActorRef<M>
where
    T: Message + Into<M>,
    M: Message,
{
    async fn tell(&self, msg: T, sender: Sender) {
        self.send_msg(msg.into(), sender).await;
    }

    fn box_clone(&self) -> BoxedTell<T> {
        Box::new((*self).clone())
    }
}

impl<T> ActorReference for BoxedTell<T>
where
    T: Message,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn uri(&self) -> &ActorUri {
        (**self).uri()
    }

    fn path(&self) -> &ActorPath {
        (**self).path()
    }

    fn is_root(&self) -> bool {
        (**self).is_root()
    }

    fn parent(&self) -> BasicActorRef {
        (**self).parent()
    }

    fn user_root(&self) -> BasicActorRef {
        (**self).user_root()
    }

    fn has_children(&self) -> bool {
        (**self).has_children()
    }

    fn is_child(&self, actor: &BasicActorRef) -> bool {
        (**self).is_child(actor)
    }

    fn children(&self) -> Vec<BasicActorRef> {
        (**self).children()
    }

    fn sys_tell(&self, msg: SystemMsg) {
        (**self).sys_tell(msg)
    }
}

impl<T> PartialEq for BoxedTell<T> {
    fn eq(&self, other: &BoxedTell<T>) -> bool {
        self.path() == other.path()
    }
}

impl<T> fmt::Debug for BoxedTell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Tell[{:?}]", self.uri())
    }
}

impl<T> fmt::Display for BoxedTell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Tell[{}]", self.uri())
    }
}

impl<T: 'static> Clone for BoxedTell<T> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A lightweight, un-typed reference to interact with its underlying
/// actor instance through concurrent messaging.
///
/// `BasicActorRef` can be derived from an original `ActorRef<Msg>`.
///
/// `BasicActorRef` allows for un-typed messaging using `try_tell`,
/// that will return a `Result`. If the message type was not supported,
/// the result will contain an `Error`.
///
/// `BasicActorRef` can be used when the original `ActorRef` isn't
/// available, when you need to use collections to store references from
/// different actor types, or when sending messages to a type-erased
/// recipient such as a dead letter subscriber.
///
/// In general, it is better to use `ActorRef` where possible.
#[derive(Clone)]
pub struct BasicActorRef {
    pub(crate) cell: ActorCell,
}

impl BasicActorRef {
    pub(crate) fn new(cell: ActorCell) -> BasicActorRef {
        BasicActorRef { cell }
    }

    /// Send a message to this actor
    ///
    /// Returns a result. If the message type is not supported Error is
    /// returned.
    pub async fn try_tell<Msg>(
        &self,
        msg: Msg,
        sender: impl Into<Option<BasicActorRef>> + Send,
    ) -> Result<(), ()>
    where
        Msg: Message + Send,
    {
        self.try_tell_any(&mut AnyMessage::new(msg, true), sender)
            .await
    }

    pub async fn try_tell_any(
        &self,
        msg: &mut AnyMessage,
        sender: impl Into<Option<BasicActorRef>> + Send,
    ) -> Result<(), ()> {
        self.cell.send_any_msg(msg, sender.into(), None).await
    }

    pub(crate) async fn try_tell_with<Msg>(
        &self,
        msg: Msg,
        sender: Sender,
        ask: Option<AskRequest>,
    ) -> Result<(), ()>
    where
        Msg: Message,
    {
        self.cell
            .send_any_msg(&mut AnyMessage::new(msg, true), sender, ask)
            .await
    }

    pub(crate) fn status(&self) -> ActorStatus {
        self.cell.status()
    }

    pub(crate) async fn await_stopped(&self) {
        self.cell.await_stopped().await
    }
}

impl ActorReference for BasicActorRef {
    fn name(&self) -> &str {
        &self.cell.uri().name
    }

    fn uri(&self) -> &ActorUri {
        self.cell.uri()
    }

    fn path(&self) -> &ActorPath {
        &self.cell.uri().path
    }

    fn is_root(&self) -> bool {
        self.cell.is_root()
    }

    fn parent(&self) -> BasicActorRef {
        self.cell.parent()
    }

    fn user_root(&self) -> BasicActorRef {
        self.cell.user_root()
    }

    fn has_children(&self) -> bool {
        self.cell.has_children()
    }

    fn is_child(&self, actor: &BasicActorRef) -> bool {
        self.cell.is_child(actor)
    }

    fn children(&self) -> Vec<BasicActorRef> {
        self.cell.children_refs()
    }

    fn sys_tell(&self, msg: SystemMsg) {
        let envelope = Envelope::new(msg, None);
        let _ = self.cell.send_sys_msg(envelope);
    }
}

impl ActorReference for &BasicActorRef {
    fn name(&self) -> &str {
        &self.cell.uri().name
    }

    fn uri(&self) -> &ActorUri {
        self.cell.uri()
    }

    fn path(&self) -> &ActorPath {
        &self.cell.uri().path
    }

    fn is_root(&self) -> bool {
        self.cell.is_root()
    }

    fn parent(&self) -> BasicActorRef {
        self.cell.parent()
    }

    fn user_root(&self) -> BasicActorRef {
        self.cell.user_root()
    }

    fn has_children(&self) -> bool {
        self.cell.has_children()
    }

    fn is_child(&self, actor: &BasicActorRef) -> bool {
        self.cell.is_child(actor)
    }

    fn children(&self) -> Vec<BasicActorRef> {
        self.cell.children_refs()
    }

    fn sys_tell(&self, msg: SystemMsg) {
        let envelope = Envelope::new(msg, None);
        let _ = self.cell.send_sys_msg(envelope);
    }
}

impl fmt::Debug for BasicActorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BasicActorRef[{:?}]", self.cell.uri())
    }
}

impl fmt::Display for BasicActorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BasicActorRef[{}]", self.cell.uri())
    }
}

impl PartialEq for BasicActorRef {
    fn eq(&self, other: &BasicActorRef) -> bool {
        self.cell.uri().path == other.cell.uri().path
    }
}

impl<Msg> From<ActorRef<Msg>> for BasicActorRef
where
    Msg: Message,
{
    fn from(actor: ActorRef<Msg>) -> BasicActorRef {
        BasicActorRef::new(ActorCell::from(actor.cell))
    }
}

impl<Msg> From<ActorRef<Msg>> for Option<BasicActorRef>
where
    Msg: Message,
{
    fn from(actor: ActorRef<Msg>) -> Option<BasicActorRef> {
        Some(BasicActorRef::new(ActorCell::from(actor.cell)))
    }
}

pub type Sender = Option<BasicActorRef>;

/// A lightweight, typed reference to interact with its underlying
/// actor instance through concurrent messaging.
///
/// All ActorRefs are products of `system.actor_of` or `context.actor_of`.
/// When an actor is created using `actor_of` an `ActorRef<Msg>` is
/// returned, where `Msg` is the mailbox message type for the actor.
///
/// Actor references are lightweight and can be cloned without concern
/// for memory use.
///
/// Messages sent to an actor are added to the actor's mailbox.
///
/// In the event that the underlying actor is terminated messages sent
/// to the actor will be routed to dead letters.
///
/// If an actor is restarted all existing references continue to
/// be valid.
#[derive(Clone)]
pub struct ActorRef<Msg: Message> {
    pub(crate) cell: ExtendedCell<Msg>,
}

impl<Msg: Message> ActorRef<Msg> {
    pub(crate) fn new(cell: ExtendedCell<Msg>) -> ActorRef<Msg> {
        ActorRef { cell }
    }

    pub async fn send_msg(&self, msg: Msg, sender: impl Into<Option<BasicActorRef>> + Send) {
        let envelope = Envelope::new(msg, sender.into());
        // consume the result (we don't return it to user)
        let _ = self.cell.send_msg(envelope).await;
    }

    /// Sends `msg` and returns a future resolving with the reply.
    ///
    /// A fresh correlation id is registered in the system's ask table
    /// with the given timeout (the system default when `None`). The
    /// waiter resolves with the reply payload, or rejects with the
    /// handler's error or a timeout; whichever comes first wins and the
    /// timer is canceled.
    pub async fn ask<T, R>(
        &self,
        msg: T,
        timeout: impl Into<Option<Duration>> + Send,
    ) -> Result<R, AskError>
    where
        T: Into<Msg> + Send,
        R: Message,
    {
        ask_via(&self.cell, msg.into(), timeout.into()).await
    }
}

/// Registers an ask waiter and sends the enveloped request to the cell.
pub(crate) async fn ask_via<M, R>(
    cell: &ExtendedCell<M>,
    msg: M,
    timeout: Option<Duration>,
) -> Result<R, AskError>
where
    M: Message,
    R: Message,
{
    let sys: ActorSystem = cell.cell().system().clone();
    let timeout = timeout.unwrap_or_else(|| sys.config().ask.default_timeout);

    let id = Uuid::new_v4();
    let rx = sys.asks().register(id, cell.path().clone(), timeout);

    let env = Envelope {
        msg,
        sender: None,
        ask: Some(AskRequest { id, origin: None }),
    };
    // a rejected envelope fails the waiter via the registry
    let _ = cell.send_msg(env).await;

    match rx.await {
        Ok(Ok(payload)) => payload
            .downcast::<R>()
            .map(|r| *r)
            .map_err(|_| AskError::UnexpectedReply),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AskError::Unreachable),
    }
}

impl<Msg: Message> ActorReference for ActorRef<Msg> {
    fn name(&self) -> &str {
        &self.cell.uri().name
    }

    fn uri(&self) -> &ActorUri {
        self.cell.uri()
    }

    fn path(&self) -> &ActorPath {
        &self.cell.uri().path
    }

    fn is_root(&self) -> bool {
        self.cell.cell().is_root()
    }

    fn parent(&self) -> BasicActorRef {
        self.cell.cell().parent()
    }

    fn user_root(&self) -> BasicActorRef {
        self.cell.cell().user_root()
    }

    fn has_children(&self) -> bool {
        self.cell.cell().has_children()
    }

    fn is_child(&self, actor: &BasicActorRef) -> bool {
        self.cell.cell().is_child(actor)
    }

    fn children(&self) -> Vec<BasicActorRef> {
        self.cell.cell().children_refs()
    }

    fn sys_tell(&self, msg: SystemMsg) {
        let envelope = Envelope::new(msg, None);
        let _ = self.cell.cell().send_sys_msg(envelope);
    }
}

impl<Msg: Message> ActorReference for &ActorRef<Msg> {
    fn name(&self) -> &str {
        &self.cell.uri().name
    }

    fn uri(&self) -> &ActorUri {
        self.cell.uri()
    }

    fn path(&self) -> &ActorPath {
        &self.cell.uri().path
    }

    fn is_root(&self) -> bool {
        self.cell.cell().is_root()
    }

    fn parent(&self) -> BasicActorRef {
        self.cell.cell().parent()
    }

    fn user_root(&self) -> BasicActorRef {
        self.cell.cell().user_root()
    }

    fn has_children(&self) -> bool {
        self.cell.cell().has_children()
    }

    fn is_child(&self, actor: &BasicActorRef) -> bool {
        self.cell.cell().is_child(actor)
    }

    fn children(&self) -> Vec<BasicActorRef> {
        self.cell.cell().children_refs()
    }

    fn sys_tell(&self, msg: SystemMsg) {
        let envelope = Envelope::new(msg, None);
        let _ = self.cell.cell().send_sys_msg(envelope);
    }
}

impl<Msg: Message> fmt::Debug for ActorRef<Msg> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ActorRef[{:?}]", self.uri())
    }
}

impl<Msg: Message> fmt::Display for ActorRef<Msg> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ActorRef[{}]", self.uri())
    }
}

impl<Msg: Message> PartialEq for ActorRef<Msg> {
    fn eq(&self, other: &ActorRef<Msg>) -> bool {
        self.uri().path == other.uri().path
    }
}

/// Produces `ActorRef`s. The returned ref is live immediately:
/// messages sent before `pre_start` completes are queued in the
/// mailbox and processed once initialization finishes.
#[async_trait]
pub trait ActorRefFactory {
    async fn actor_of<A>(
        &self,
        props: BoxActorProd<A>,
        name: &str,
    ) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor;

    /// Spawns under a generated unique name.
    async fn actor_of_anon<A>(&self, props: BoxActorProd<A>) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor,
    {
        let name = format!("{}", Uuid::new_v4().to_simple());
        self.actor_of(props, &name).await
    }

    fn stop(&self, actor: impl ActorReference);
}
