#![allow(unused_variables)]
pub(crate) mod actor_cell;
pub(crate) mod actor_ref;
pub(crate) mod channel;
pub(crate) mod props;
pub(crate) mod uri;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::{error::Error, fmt};

use async_trait::async_trait;
use uuid::Uuid;

use crate::validate::InvalidName;

// Public lattice::actor API (plus the pub data types in this file)
pub use self::{
    actor_cell::{ActorStatus, Context},
    actor_ref::{
        ActorRef, ActorRefFactory, ActorReference, BasicActorRef, BoxedTell, Sender, Tell,
    },
    channel::{
        channel, All, Channel, ChannelMsg, ChannelRef, DLChannelMsg, DeadLetter, Publish,
        Subscribe, Topic, Unsubscribe, UnsubscribeAll, DEAD_LETTER_TOPIC,
    },
    props::{ActorArgs, ActorProducer, BoxActorProd, Props},
    uri::{ActorAddress, ActorPath, ActorUri},
};

use crate::{system::SystemMsg, Message};

pub type ActorResult = Result<(), ActorError>;

/// The error carried through the supervision state machine.
///
/// Handler panics are converted into this type by the kernel, so a
/// decider sees uncaught panics and explicit `Err` returns alike.
#[derive(Clone)]
pub struct ActorError {
    reason: Arc<str>,
}

impl ActorError {
    pub fn new(reason: impl Into<String>) -> Self {
        ActorError {
            reason: Arc::from(reason.into()),
        }
    }

    pub(crate) fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "actor panicked".to_string()
        };
        ActorError::new(reason)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Error for ActorError {}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Actor failed. Cause: {}", self.reason)
    }
}

impl fmt::Debug for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<crate::persist::JournalError> for ActorError {
    fn from(err: crate::persist::JournalError) -> ActorError {
        ActorError::new(err.to_string())
    }
}

#[allow(unused)]
pub type MsgResult<T> = Result<(), MsgError<T>>;

/// Internal message error when a message can't be added to an actor's mailbox
#[doc(hidden)]
#[derive(Clone)]
pub struct MsgError<T> {
    pub msg: T,
}

impl<T> MsgError<T> {
    pub fn new(msg: T) -> Self {
        MsgError { msg }
    }
}

impl<T> Error for MsgError<T> {}

impl<T> fmt::Display for MsgError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("The actor does not exist. It may have been terminated")
    }
}

impl<T> fmt::Debug for MsgError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error type when an actor fails to start during `actor_of`.
pub enum CreateError {
    Panicked,
    System,
    SystemTerminating,
    InvalidName(String),
    AlreadyExists(ActorPath),
    ParentNotRunning(ActorPath),
}

impl Error for CreateError {}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CreateError::Panicked => {
                f.write_str("Failed to create actor. Cause: Actor panicked while starting")
            }
            CreateError::System => f.write_str("Failed to create actor. Cause: System failure"),
            CreateError::SystemTerminating => {
                f.write_str("Failed to create actor. Cause: System is terminating")
            }
            CreateError::InvalidName(name) => write!(
                f,
                "Failed to create actor. Cause: Invalid actor name ({})",
                name
            ),
            CreateError::AlreadyExists(path) => write!(
                f,
                "Failed to create actor. Cause: An actor at the same path already exists ({})",
                path
            ),
            CreateError::ParentNotRunning(path) => write!(
                f,
                "Failed to create actor. Cause: Parent is not running ({})",
                path
            ),
        }
    }
}

impl fmt::Debug for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<InvalidName> for CreateError {
    fn from(err: InvalidName) -> CreateError {
        CreateError::InvalidName(err.name)
    }
}

/// Error type returned by `ask` when no reply is produced.
#[derive(Clone)]
pub enum AskError {
    /// The deadline expired before a reply arrived.
    Timeout {
        correlation_id: Uuid,
        path: ActorPath,
    },
    /// The target's handler failed while the ask was pending.
    Failed(ActorError),
    /// The target could not be reached (terminated or unknown).
    Unreachable,
    /// A reply arrived but was of an unexpected type.
    UnexpectedReply,
}

impl Error for AskError {}

impl fmt::Display for AskError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AskError::Timeout {
                correlation_id,
                path,
            } => write!(
                f,
                "Ask timed out. Correlation: {}, target: {}",
                correlation_id, path
            ),
            AskError::Failed(err) => write!(f, "Ask failed. Cause: {}", err),
            AskError::Unreachable => f.write_str("Ask target is unreachable"),
            AskError::UnexpectedReply => f.write_str("Ask reply was of an unexpected type"),
        }
    }
}

impl fmt::Debug for AskError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[async_trait]
pub trait Actor: Send + Sync + 'static {
    type Msg: Message;

    /// Invoked when an actor is being started by the system.
    ///
    /// Any initialization inherent to the actor's role should be
    /// performed here, including replaying a journal for event-sourced
    /// actors. No message is processed until this returns.
    ///
    /// Errors and panics in `pre_start` do not invoke the supervision
    /// strategy and the actor will be terminated.
    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        Ok(())
    }

    /// Invoked after an actor has started.
    ///
    /// Panics in `post_start` follow the supervision strategy.
    async fn post_start(&mut self, ctx: &Context<Self::Msg>) {}

    /// Invoked on the failed instance before it is discarded by a
    /// restart. The message being handled at failure time has already
    /// been dropped.
    async fn pre_restart(&mut self, ctx: &Context<Self::Msg>, err: &ActorError) {}

    /// Invoked on the fresh instance after a restart, before any user
    /// message is processed.
    async fn post_restart(&mut self, ctx: &Context<Self::Msg>, err: &ActorError) {}

    /// Invoked after an actor has been stopped.
    async fn post_stop(&mut self) {}

    /// Return the supervision strategy applied when this actor fails.
    ///
    /// `Escalate` re-raises the failure as the parent's own failure.
    fn supervisor_strategy(&self) -> Strategy {
        Strategy::Restart
    }

    /// Invoked when an actor receives a system message
    ///
    /// It is guaranteed that only one message in the actor's mailbox is
    /// processed at any one time, including `recv` and `sys_recv`.
    async fn sys_recv(&mut self, ctx: &Context<Self::Msg>, msg: SystemMsg, sender: Sender) {}

    /// Invoked when an actor receives a message
    ///
    /// It is guaranteed that only one message in the actor's mailbox is
    /// processed at any one time, including `recv` and `sys_recv`.
    /// Returning an error enters the supervision state machine.
    async fn recv(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: Self::Msg,
        sender: Sender,
    ) -> ActorResult;
}

/// Receive and handle a specific message type
///
/// This trait is implemented for each message type an actor receives,
/// with `Actor::recv` dispatching over the actor's sealed message enum
/// to the respective implementation.
#[async_trait]
pub trait Receive<Msg: Message> {
    type Msg: Message;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: Msg,
        sender: Sender,
    ) -> ActorResult;
}

/// Supervision directive for one failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Drop the failed message and continue with the next
    Resume,

    /// Attempt to restart the actor, preserving its mailbox and ref
    Restart,

    /// Stop the actor
    Stop,

    /// Re-raise the failure as the parent's own failure
    Escalate,
}

pub type Decider = Arc<dyn Fn(&ActorError) -> Directive + Send + Sync>;

/// Supervision strategy
///
/// Returned in `Actor::supervisor_strategy`
#[derive(Clone)]
pub enum Strategy {
    /// Resume the actor, dropping the failed message
    Resume,

    /// Attempt to restart the actor
    Restart,

    /// Stop the actor
    Stop,

    /// Escalate the failure to the parent
    Escalate,

    /// Decide per error
    Decider(Decider),
}

impl Strategy {
    /// Maps a failure to a directive. `Err` marks a malfunctioning
    /// decider; the kernel logs it and escalates.
    pub(crate) fn decide(&self, err: &ActorError) -> Result<Directive, ()> {
        match self {
            Strategy::Resume => Ok(Directive::Resume),
            Strategy::Restart => Ok(Directive::Restart),
            Strategy::Stop => Ok(Directive::Stop),
            Strategy::Escalate => Ok(Directive::Escalate),
            Strategy::Decider(decider) => {
                let decider = decider.clone();
                catch_unwind(AssertUnwindSafe(|| decider(err))).map_err(|_| ())
            }
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Strategy::Resume => f.write_str("Resume"),
            Strategy::Restart => f.write_str("Restart"),
            Strategy::Stop => f.write_str("Stop"),
            Strategy::Escalate => f.write_str("Escalate"),
            Strategy::Decider(_) => f.write_str("Decider"),
        }
    }
}
