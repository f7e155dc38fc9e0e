#![crate_name = "lattice"]
#![deny(clippy::all)]
#![allow(clippy::new_ret_no_self)]
#![allow(clippy::large_enum_variant)]

mod validate;

pub mod actor;
pub mod cluster;
pub mod config;
pub mod delivery;
pub mod kernel;
pub mod persist;
pub mod remote;
pub mod sharding;
pub mod system;

use std::any::Any;
use std::fmt;
use std::fmt::Debug;

use uuid::Uuid;

use crate::actor::{ActorAddress, BasicActorRef};

/// Wraps message and sender
#[derive(Clone, Debug)]
pub struct Envelope<T: Message> {
    pub sender: Option<BasicActorRef>,
    pub msg: T,
    pub ask: Option<AskRequest>,
}

impl<T: Message> Envelope<T> {
    pub fn new(msg: T, sender: Option<BasicActorRef>) -> Self {
        Envelope {
            msg,
            sender,
            ask: None,
        }
    }
}

/// Correlation for a request expecting a reply.
///
/// Carried inside an [`Envelope`]. `origin` is set when the request
/// arrived over a remote transport; local asks resolve through the
/// system's ask registry directly.
#[derive(Clone, Debug)]
pub struct AskRequest {
    pub id: Uuid,
    pub origin: Option<ActorAddress>,
}

pub trait Message: Debug + Clone + Send + 'static {}
impl<T: Debug + Clone + Send + 'static> Message for T {}

pub struct AnyMessage {
    pub one_time: bool,
    pub msg: Option<Box<dyn Any + Send>>,
}

pub struct DowncastAnyMessageError;

impl AnyMessage {
    pub fn new<T>(msg: T, one_time: bool) -> Self
    where
        T: Any + Message,
    {
        Self {
            one_time,
            msg: Some(Box::new(msg)),
        }
    }

    pub fn take<T>(&mut self) -> Result<T, DowncastAnyMessageError>
    where
        T: Any + Message,
    {
        if self.one_time {
            match self.msg.take() {
                Some(m) => {
                    if m.is::<T>() {
                        Ok(*m.downcast::<T>().unwrap())
                    } else {
                        Err(DowncastAnyMessageError)
                    }
                }
                None => Err(DowncastAnyMessageError),
            }
        } else {
            match self.msg.as_ref() {
                Some(m) if m.is::<T>() => Ok(m.downcast_ref::<T>().cloned().unwrap()),
                Some(_) => Err(DowncastAnyMessageError),
                None => Err(DowncastAnyMessageError),
            }
        }
    }
}

impl Clone for AnyMessage {
    fn clone(&self) -> Self {
        panic!("Can't clone a message of type `AnyMessage`");
    }
}

impl Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("AnyMessage")
    }
}

pub mod actors {
    //! The public API types of the actor runtime.

    pub use crate::actor::*;
    pub use crate::config::{load_config, Config};
    pub use crate::system::{
        ActorSystem, Run, ScheduleId, SystemBuilder, SystemCmd, SystemEvent, SystemMsg, Timer,
    };
    pub use crate::{AnyMessage, AskRequest, Envelope, Message};
}
