//! Cluster membership contract.
//!
//! Membership gossip itself is an external collaborator: a plugin
//! implementing [`Membership`] feeds a stream of [`ClusterEvent`]s into
//! the system's `cluster_events` channel via
//! `ActorSystem::publish_cluster_event`. The shard coordinator
//! subscribes to that channel.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;

use crate::{
    actor::{ActorAddress, Topic},
    system::ActorSystem,
};

#[derive(Clone, Debug)]
pub enum ClusterEvent {
    MemberUp(ActorAddress),
    MemberDown(ActorAddress),
    UnreachableMember(ActorAddress),
}

impl ClusterEvent {
    pub fn address(&self) -> &ActorAddress {
        match self {
            ClusterEvent::MemberUp(addr) => addr,
            ClusterEvent::MemberDown(addr) => addr,
            ClusterEvent::UnreachableMember(addr) => addr,
        }
    }
}

impl<'a> From<&'a ClusterEvent> for Topic {
    fn from(evt: &ClusterEvent) -> Self {
        match evt {
            ClusterEvent::MemberUp(_) => Topic::from("member.up"),
            ClusterEvent::MemberDown(_) => Topic::from("member.down"),
            ClusterEvent::UnreachableMember(_) => Topic::from("member.unreachable"),
        }
    }
}

/// A pluggable membership provider.
///
/// Implementations watch the cluster by whatever means they have
/// (gossip, a registry, a static list) and publish the resulting
/// events into the system.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn start(&self, system: &ActorSystem) -> Result<(), MembershipError>;

    async fn stop(&self);
}

pub struct MembershipError {
    pub reason: String,
}

impl MembershipError {
    pub fn new(reason: impl Into<String>) -> Self {
        MembershipError {
            reason: reason.into(),
        }
    }
}

impl Error for MembershipError {}

impl fmt::Display for MembershipError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Membership provider failed. Cause: {}", self.reason)
    }
}

impl fmt::Debug for MembershipError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
