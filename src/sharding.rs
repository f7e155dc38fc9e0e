//! Cluster sharding: entities addressed by id within a type, placed in
//! shards, shards allocated to regions by a single persistent
//! coordinator.
//!
//! A message for entity `e` is wrapped in a [`ShardEnvelope`] and sent
//! through a [`ShardedRef`] to the local [`ShardRegion`]. The region
//! forwards to its local [`Shard`] when it owns the shard, asks the
//! [`ShardCoordinator`] for the shard's home otherwise, buffering until
//! the allocation arrives.

pub(crate) mod coordinator;
pub(crate) mod proxy;
pub(crate) mod region;
pub(crate) mod shard;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    actor::{
        Actor, ActorRef, BasicActorRef, BoxActorProd, BoxedTell, CreateError, Props,
    },
    config::Config,
    persist::Journal,
    system::ActorSystem,
    Message,
};

pub use self::coordinator::{
    GetShardHome, HandOffComplete, RegisterShardRegion, ShardCoordinator, ShardCoordinatorEvent,
    ShardCoordinatorMsg, ShardTerminated,
};
pub use self::proxy::ShardedRef;
pub use self::region::{ShardRegion, ShardRegionMsg};
pub use self::shard::{PassivationTick, Shard, ShardMsg};

pub type ShardId = String;
pub type EntityId = String;

/// A message routed to one entity of a sharded type.
#[derive(Clone, Debug)]
pub struct ShardEnvelope<M: Message> {
    pub entity_id: EntityId,
    pub shard_id: ShardId,
    pub msg: M,
}

/// Region-level request to stop an idle entity. The entity is spawned
/// fresh on its next message.
#[derive(Clone, Debug)]
pub struct PassivateEntity {
    pub entity_id: EntityId,
}

/// Commands a coordinator sends to a region. Type-erased so one
/// coordinator can serve regions of any entity type.
#[derive(Clone, Debug)]
pub enum RegionCommand {
    ShardHomeAllocated {
        type_name: String,
        shard_id: ShardId,
        region: BasicActorRef,
    },
    HandOff {
        shard_id: ShardId,
    },
}

/// How a region is addressed by the coordinator.
pub type RegionHandle = BoxedTell<RegionCommand>;

/// Derives entity and shard ids from messages of a sharded type.
pub trait MessageExtractor<M: Message>: Send + Sync + 'static {
    /// `None` is a routing failure; the message is dropped with a
    /// warning.
    fn entity_id(&self, msg: &M) -> Option<EntityId>;

    fn shard_id(&self, entity_id: &EntityId) -> ShardId;
}

/// A `MessageExtractor` from two plain functions.
pub struct FnExtractor<M: Message> {
    pub entity_id: fn(&M) -> Option<EntityId>,
    pub shard_id: fn(&EntityId) -> ShardId,
}

impl<M: Message> MessageExtractor<M> for FnExtractor<M> {
    fn entity_id(&self, msg: &M) -> Option<EntityId> {
        (self.entity_id)(msg)
    }

    fn shard_id(&self, entity_id: &EntityId) -> ShardId {
        (self.shard_id)(entity_id)
    }
}

/// The default shard id function: hash the entity id into
/// `num_shards` buckets.
pub fn shard_id_for(entity_id: &str, num_shards: u64) -> ShardId {
    let mut hasher = DefaultHasher::new();
    entity_id.hash(&mut hasher);
    format!("{}", hasher.finish() % num_shards.max(1))
}

/// Reaction to `UnreachableMember` in the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnreachablePolicy {
    /// Keep the region's allocations but exclude it from new ones
    /// until it is reachable again or goes down.
    Suspend,

    /// Treat unreachable as down: deallocate immediately.
    Remove,
}

impl FromStr for UnreachablePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suspend" => Ok(UnreachablePolicy::Suspend),
            "remove" => Ok(UnreachablePolicy::Remove),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShardingSettings {
    pub unreachable_policy: UnreachablePolicy,
    pub passivation_timeout: Option<Duration>,
    pub coordinator_persistence_id: String,
}

impl ShardingSettings {
    pub fn from_config(cfg: &Config) -> Self {
        ShardingSettings {
            unreachable_policy: cfg.sharding.unreachable_policy,
            passivation_timeout: cfg.sharding.passivation_timeout,
            coordinator_persistence_id: cfg.sharding.coordinator_persistence_id.clone(),
        }
    }
}

/// Starts the shard coordinator under the user guardian.
pub async fn shard_coordinator(
    sys: &ActorSystem,
    journal: Arc<dyn Journal>,
    name: &str,
) -> Result<ActorRef<ShardCoordinatorMsg>, CreateError> {
    let settings = ShardingSettings::from_config(sys.config());
    sys.provider()
        .create_actor(
            Props::new_args(ShardCoordinator::new, (journal, settings)),
            name,
            &sys.user_root(),
            sys,
        )
        .await
}

/// Starts a shard region for entity type `E` and returns it together
/// with the sharded ref that routes to it.
pub async fn shard_region<E>(
    sys: &ActorSystem,
    type_name: &str,
    name: &str,
    coordinator: ActorRef<ShardCoordinatorMsg>,
    entity_props: BoxActorProd<E>,
    extractor: Arc<dyn MessageExtractor<E::Msg>>,
) -> Result<(ActorRef<ShardRegionMsg<E>>, ShardedRef<E>), CreateError>
where
    E: Actor,
    E::Msg: Sync,
{
    let settings = ShardingSettings::from_config(sys.config());
    let region = sys
        .provider()
        .create_actor(
            Props::new_args(
                ShardRegion::new,
                (
                    type_name.to_string(),
                    coordinator,
                    entity_props,
                    extractor.clone(),
                    settings,
                ),
            ),
            name,
            &sys.user_root(),
            sys,
        )
        .await?;

    let sharded = ShardedRef::new(type_name.to_string(), region.clone(), extractor, sys.clone());
    Ok((region, sharded))
}
