use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, warn};

use crate::{
    actor::{
        Actor, ActorAddress, ActorReference, ActorResult, All, BasicActorRef, Context, Receive,
        Sender, Subscribe, Tell,
    },
    cluster::ClusterEvent,
    persist::{Journal, Persistence},
    sharding::{RegionCommand, RegionHandle, ShardId, ShardingSettings, UnreachablePolicy},
};

#[derive(Clone, Debug)]
pub struct RegisterShardRegion {
    pub region: RegionHandle,
    pub region_ref: BasicActorRef,
    pub address: ActorAddress,
}

#[derive(Clone, Debug)]
pub struct GetShardHome {
    pub type_name: String,
    pub shard_id: ShardId,
    pub region: RegionHandle,
}

#[derive(Clone, Debug)]
pub struct ShardTerminated {
    pub shard_id: ShardId,
    pub region: BasicActorRef,
}

#[derive(Clone, Debug)]
pub struct HandOffComplete {
    pub shard_id: ShardId,
    pub region: BasicActorRef,
}

#[derive(Clone, Debug)]
pub enum ShardCoordinatorMsg {
    Register(RegisterShardRegion),
    GetShardHome(GetShardHome),
    ShardTerminated(ShardTerminated),
    HandOffComplete(HandOffComplete),
    Cluster(ClusterEvent),
}

impl From<RegisterShardRegion> for ShardCoordinatorMsg {
    fn from(msg: RegisterShardRegion) -> Self {
        ShardCoordinatorMsg::Register(msg)
    }
}

impl From<GetShardHome> for ShardCoordinatorMsg {
    fn from(msg: GetShardHome) -> Self {
        ShardCoordinatorMsg::GetShardHome(msg)
    }
}

impl From<ShardTerminated> for ShardCoordinatorMsg {
    fn from(msg: ShardTerminated) -> Self {
        ShardCoordinatorMsg::ShardTerminated(msg)
    }
}

impl From<HandOffComplete> for ShardCoordinatorMsg {
    fn from(msg: HandOffComplete) -> Self {
        ShardCoordinatorMsg::HandOffComplete(msg)
    }
}

impl From<ClusterEvent> for ShardCoordinatorMsg {
    fn from(evt: ClusterEvent) -> Self {
        ShardCoordinatorMsg::Cluster(evt)
    }
}

/// The persisted shard placement events.
#[derive(Clone, Debug)]
pub enum ShardCoordinatorEvent {
    RegionRegistered { path: String, address: ActorAddress },
    ShardAllocated { shard_id: ShardId, region_path: String },
    ShardTerminated { shard_id: ShardId, region_path: String },
    RegionRemoved { path: String },
}

/// The single authoritative owner of shard-to-region allocation.
///
/// A persistent actor: placement decisions are journaled before the
/// in-memory maps change and before any reply, so a restarted
/// coordinator recovers the same allocations. There is no quorum and
/// no multi-writer resolution.
pub struct ShardCoordinator {
    persistence: Persistence<ShardCoordinatorEvent>,
    policy: UnreachablePolicy,

    // durable state, rebuilt from events
    allocations: HashMap<ShardId, String>,
    region_shards: HashMap<String, BTreeSet<ShardId>>,
    registered: Vec<String>,
    addresses: HashMap<String, ActorAddress>,

    // runtime-only state
    live: HashMap<String, (RegionHandle, BasicActorRef)>,
    suspended: HashSet<String>,
    round_robin_index: usize,
}

impl ShardCoordinator {
    pub fn new((journal, settings): (Arc<dyn Journal>, ShardingSettings)) -> Self {
        ShardCoordinator {
            persistence: Persistence::new(journal, settings.coordinator_persistence_id.clone()),
            policy: settings.unreachable_policy,
            allocations: HashMap::new(),
            region_shards: HashMap::new(),
            registered: Vec::new(),
            addresses: HashMap::new(),
            live: HashMap::new(),
            suspended: HashSet::new(),
            round_robin_index: 0,
        }
    }

    fn apply(&mut self, event: &ShardCoordinatorEvent) {
        match event {
            ShardCoordinatorEvent::RegionRegistered { path, address } => {
                if let Err(pos) = self.registered.binary_search(path) {
                    self.registered.insert(pos, path.clone());
                }
                self.addresses.insert(path.clone(), address.clone());
            }
            ShardCoordinatorEvent::ShardAllocated {
                shard_id,
                region_path,
            } => {
                self.allocations.insert(shard_id.clone(), region_path.clone());
                self.region_shards
                    .entry(region_path.clone())
                    .or_default()
                    .insert(shard_id.clone());
            }
            ShardCoordinatorEvent::ShardTerminated {
                shard_id,
                region_path,
            } => {
                self.allocations.remove(shard_id);
                if let Some(shards) = self.region_shards.get_mut(region_path) {
                    shards.remove(shard_id);
                    if shards.is_empty() {
                        self.region_shards.remove(region_path);
                    }
                }
            }
            ShardCoordinatorEvent::RegionRemoved { path } => {
                if let Ok(pos) = self.registered.binary_search(path) {
                    self.registered.remove(pos);
                }
                self.addresses.remove(path);
                if let Some(shards) = self.region_shards.remove(path) {
                    for shard in shards {
                        self.allocations.remove(&shard);
                    }
                }
            }
        }
    }

    /// Round-robin over the registered regions, sorted by path, that
    /// are currently reachable and have a live handle.
    fn pick_region(&mut self) -> Option<String> {
        let active: Vec<&String> = self
            .registered
            .iter()
            .filter(|path| !self.suspended.contains(*path) && self.live.contains_key(*path))
            .collect();

        if active.is_empty() {
            return None;
        }

        let pick = active[self.round_robin_index % active.len()].clone();
        self.round_robin_index += 1;
        Some(pick)
    }

    fn regions_on(&self, addr: &ActorAddress) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|(_, a)| a.same_node(addr))
            .map(|(path, _)| path.clone())
            .collect()
    }

    async fn remove_regions_on(
        &mut self,
        ctx: &Context<ShardCoordinatorMsg>,
        addr: &ActorAddress,
    ) -> ActorResult {
        for path in self.regions_on(addr) {
            debug!(
                ctx.system().log(),
                "Removing shard region {} (member down)", path
            );
            let event = ShardCoordinatorEvent::RegionRemoved { path: path.clone() };
            self.persistence.persist(event.clone()).await?;
            self.apply(&event);
            self.live.remove(&path);
            self.suspended.remove(&path);
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        // recovery: fold the journal back into the placement maps
        let events = self.persistence.replay().await?;
        for (event, _nr) in &events {
            self.apply(event);
        }

        let sub = Subscribe {
            topic: All.into(),
            actor: Box::new(ctx.myself()),
        };
        ctx.system().cluster_events().tell(sub, None).await;

        Ok(())
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, sender: Sender) -> ActorResult {
        match msg {
            ShardCoordinatorMsg::Register(msg) => self.receive(ctx, msg, sender).await,
            ShardCoordinatorMsg::GetShardHome(msg) => self.receive(ctx, msg, sender).await,
            ShardCoordinatorMsg::ShardTerminated(msg) => self.receive(ctx, msg, sender).await,
            ShardCoordinatorMsg::HandOffComplete(msg) => self.receive(ctx, msg, sender).await,
            ShardCoordinatorMsg::Cluster(evt) => self.receive(ctx, evt, sender).await,
        }
    }
}

#[async_trait]
impl Receive<RegisterShardRegion> for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: RegisterShardRegion,
        _sender: Sender,
    ) -> ActorResult {
        let path = msg.region.path().to_string();

        self.live
            .insert(path.clone(), (msg.region.clone(), msg.region_ref.clone()));
        self.suspended.remove(&path);

        if !self.registered.contains(&path) {
            let event = ShardCoordinatorEvent::RegionRegistered {
                path: path.clone(),
                address: msg.address.clone(),
            };
            self.persistence.persist(event.clone()).await?;
            self.apply(&event);
            debug!(ctx.system().log(), "Shard region registered: {}", path);
        }

        ctx.reply(()).await;
        Ok(())
    }
}

#[async_trait]
impl Receive<GetShardHome> for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: GetShardHome,
        _sender: Sender,
    ) -> ActorResult {
        let log = ctx.system().log();

        if let Some(owner) = self.allocations.get(&msg.shard_id).cloned() {
            if self.registered.contains(&owner) {
                match self.live.get(&owner) {
                    Some((_, owner_ref)) => {
                        msg.region
                            .tell(
                                RegionCommand::ShardHomeAllocated {
                                    type_name: msg.type_name.clone(),
                                    shard_id: msg.shard_id.clone(),
                                    region: owner_ref.clone(),
                                },
                                None,
                            )
                            .await;
                    }
                    None => {
                        // owner known from the journal but not yet
                        // re-registered; the sender retries on its next
                        // message
                        warn!(
                            log,
                            "Shard {} owner {} not re-registered yet", msg.shard_id, owner
                        );
                    }
                }
                return Ok(());
            }

            // stale allocation to an unregistered region
            let event = ShardCoordinatorEvent::ShardTerminated {
                shard_id: msg.shard_id.clone(),
                region_path: owner,
            };
            self.persistence.persist(event.clone()).await?;
            self.apply(&event);
        }

        match self.pick_region() {
            None => {
                // no reply: allocation is impossible until a region
                // registers, and the sender retries on the next message
                warn!(
                    log,
                    "Cannot allocate shard {}: no registered regions", msg.shard_id
                );
            }
            Some(owner) => {
                let event = ShardCoordinatorEvent::ShardAllocated {
                    shard_id: msg.shard_id.clone(),
                    region_path: owner.clone(),
                };
                self.persistence.persist(event.clone()).await?;
                self.apply(&event);

                debug!(
                    log,
                    "Shard {} allocated to region {}", msg.shard_id, owner
                );

                if let Some((_, owner_basic)) = self.live.get(&owner) {
                    msg.region
                        .tell(
                            RegionCommand::ShardHomeAllocated {
                                type_name: msg.type_name.clone(),
                                shard_id: msg.shard_id.clone(),
                                region: owner_basic.clone(),
                            },
                            None,
                        )
                        .await;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Receive<ShardTerminated> for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: ShardTerminated,
        _sender: Sender,
    ) -> ActorResult {
        let sender_path = msg.region.path().to_string();

        match self.allocations.get(&msg.shard_id) {
            Some(owner) if *owner == sender_path => {
                let event = ShardCoordinatorEvent::ShardTerminated {
                    shard_id: msg.shard_id.clone(),
                    region_path: sender_path,
                };
                self.persistence.persist(event.clone()).await?;
                self.apply(&event);
            }
            _ => {
                // terminations from non-owners are ignored
                warn!(
                    ctx.system().log(),
                    "Ignoring shard termination for {} from non-owner {}",
                    msg.shard_id,
                    sender_path
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Receive<HandOffComplete> for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        msg: HandOffComplete,
        _sender: Sender,
    ) -> ActorResult {
        debug!(
            ctx.system().log(),
            "Hand off of shard {} completed by {}",
            msg.shard_id,
            msg.region.path()
        );
        Ok(())
    }
}

#[async_trait]
impl Receive<ClusterEvent> for ShardCoordinator {
    type Msg = ShardCoordinatorMsg;

    async fn receive(
        &mut self,
        ctx: &Context<Self::Msg>,
        evt: ClusterEvent,
        _sender: Sender,
    ) -> ActorResult {
        match evt {
            ClusterEvent::MemberUp(addr) => {
                for path in self.regions_on(&addr) {
                    self.suspended.remove(&path);
                }
                Ok(())
            }
            ClusterEvent::MemberDown(addr) => self.remove_regions_on(ctx, &addr).await,
            ClusterEvent::UnreachableMember(addr) => match self.policy {
                UnreachablePolicy::Suspend => {
                    // keep allocations; the region only stops receiving
                    // new shards until it is reachable or downed
                    for path in self.regions_on(&addr) {
                        debug!(
                            ctx.system().log(),
                            "Suspending shard region {} (member unreachable)", path
                        );
                        self.suspended.insert(path);
                    }
                    Ok(())
                }
                UnreachablePolicy::Remove => self.remove_regions_on(ctx, &addr).await,
            },
        }
    }
}
