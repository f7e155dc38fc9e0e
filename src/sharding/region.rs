use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use slog::warn;

use crate::{
    actor::{
        Actor, ActorAddress, ActorRef, ActorRefFactory, ActorReference, ActorResult,
        BasicActorRef, BoxActorProd, Context, Props, Sender, Tell,
    },
    sharding::{
        coordinator::{GetShardHome, HandOffComplete, RegisterShardRegion, ShardTerminated},
        shard::{Shard, ShardMsg},
        MessageExtractor, RegionCommand, ShardCoordinatorMsg, ShardEnvelope, ShardId,
        ShardingSettings, PassivateEntity,
    },
    system::Run,
    Envelope,
};

pub enum ShardRegionMsg<E: Actor> {
    Envelope(ShardEnvelope<E::Msg>),
    Command(RegionCommand),
    Passivate(PassivateEntity),
}

impl<E: Actor> Clone for ShardRegionMsg<E> {
    fn clone(&self) -> Self {
        match self {
            ShardRegionMsg::Envelope(env) => ShardRegionMsg::Envelope(env.clone()),
            ShardRegionMsg::Command(cmd) => ShardRegionMsg::Command(cmd.clone()),
            ShardRegionMsg::Passivate(p) => ShardRegionMsg::Passivate(p.clone()),
        }
    }
}

impl<E: Actor> fmt::Debug for ShardRegionMsg<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShardRegionMsg::Envelope(env) => write!(f, "Envelope({:?})", env),
            ShardRegionMsg::Command(cmd) => write!(f, "Command({:?})", cmd),
            ShardRegionMsg::Passivate(p) => write!(f, "Passivate({:?})", p),
        }
    }
}

impl<E: Actor> From<ShardEnvelope<E::Msg>> for ShardRegionMsg<E> {
    fn from(env: ShardEnvelope<E::Msg>) -> Self {
        ShardRegionMsg::Envelope(env)
    }
}

impl<E: Actor> From<RegionCommand> for ShardRegionMsg<E> {
    fn from(cmd: RegionCommand) -> Self {
        ShardRegionMsg::Command(cmd)
    }
}

impl<E: Actor> From<PassivateEntity> for ShardRegionMsg<E> {
    fn from(p: PassivateEntity) -> Self {
        ShardRegionMsg::Passivate(p)
    }
}

type RegionArgs<E> = (
    String,
    ActorRef<ShardCoordinatorMsg>,
    BoxActorProd<E>,
    Arc<dyn MessageExtractor<<E as Actor>::Msg>>,
    ShardingSettings,
);

/// The per-node front end of one sharded entity type.
///
/// Owns the local shards and buffers envelopes for shards whose home
/// is not yet known. A buffered shard has exactly one outstanding
/// `GetShardHome` with the coordinator: the first buffered envelope
/// sends it, the allocation reply drains the buffer, either into a
/// freshly spawned local shard or towards the owning region.
pub struct ShardRegion<E: Actor> {
    type_name: String,
    coordinator: ActorRef<ShardCoordinatorMsg>,
    entity_props: BoxActorProd<E>,
    extractor: Arc<dyn MessageExtractor<E::Msg>>,
    settings: ShardingSettings,
    shards: HashMap<ShardId, ActorRef<ShardMsg<E>>>,
    pending: HashMap<ShardId, Vec<Envelope<ShardMsg<E>>>>,
}

impl<E: Actor> ShardRegion<E>
where
    E::Msg: Sync,
{
    pub fn new(
        (type_name, coordinator, entity_props, extractor, settings): RegionArgs<E>,
    ) -> Self {
        ShardRegion {
            type_name,
            coordinator,
            entity_props,
            extractor,
            settings,
            shards: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    async fn buffer(
        &mut self,
        ctx: &Context<ShardRegionMsg<E>>,
        shard_id: ShardId,
        msg: ShardMsg<E>,
        sender: Sender,
    ) {
        let entry = self.pending.entry(shard_id.clone()).or_default();
        let first = entry.is_empty();
        entry.push(Envelope {
            msg,
            sender,
            ask: ctx.take_ask(),
        });

        if first {
            self.coordinator
                .tell(
                    GetShardHome {
                        type_name: self.type_name.clone(),
                        shard_id,
                        region: Box::new(ctx.myself()),
                    },
                    None,
                )
                .await;
        }
    }

    async fn start_shard(
        &mut self,
        ctx: &Context<ShardRegionMsg<E>>,
        shard_id: &ShardId,
    ) -> Option<ActorRef<ShardMsg<E>>> {
        if let Some(shard) = self.shards.get(shard_id) {
            return Some(shard.clone());
        }

        let name = format!("shard-{}", shard_id);
        match ctx
            .actor_of(
                Props::new_args(
                    Shard::new,
                    (
                        shard_id.clone(),
                        self.entity_props.clone(),
                        self.settings.clone(),
                    ),
                ),
                &name,
            )
            .await
        {
            Ok(shard) => {
                self.shards.insert(shard_id.clone(), shard.clone());
                Some(shard)
            }
            Err(err) => {
                warn!(
                    ctx.system().log(),
                    "Failed to start shard {} for type {}: {}", shard_id, self.type_name, err
                );
                None
            }
        }
    }

    async fn shard_home_allocated(
        &mut self,
        ctx: &Context<ShardRegionMsg<E>>,
        shard_id: ShardId,
        region: BasicActorRef,
    ) {
        if region.path() == ctx.myself().path() {
            // allocated to us: spawn the shard and drain the buffer in
            // arrival order
            if let Some(shard) = self.start_shard(ctx, &shard_id).await {
                for env in self.pending.remove(&shard_id).unwrap_or_default() {
                    let _ = shard.cell.send_msg(env).await;
                }
            }
        } else {
            // another region owns the shard: forward the buffer there
            for env in self.pending.remove(&shard_id).unwrap_or_default() {
                let forwarded = match env.msg {
                    ShardMsg::Envelope(inner) => ShardRegionMsg::<E>::Envelope(inner),
                    ShardMsg::Passivate(p) => ShardRegionMsg::<E>::Passivate(p),
                    ShardMsg::PassivationTick(_) => continue,
                };
                let _ = region.try_tell_with(forwarded, env.sender, env.ask).await;
            }
        }
    }

    async fn hand_off(&mut self, ctx: &Context<ShardRegionMsg<E>>, shard_id: ShardId) {
        let myself: BasicActorRef = ctx.myself().into();
        let coordinator = self.coordinator.clone();

        match self.shards.remove(&shard_id) {
            Some(shard) => {
                ctx.stop(&shard);
                let shard: BasicActorRef = shard.into();
                // completion is reported once the shard (and with it
                // every entity) has actually stopped
                ctx.system().run(async move {
                    shard.await_stopped().await;
                    coordinator
                        .tell(
                            HandOffComplete {
                                shard_id: shard_id.clone(),
                                region: myself.clone(),
                            },
                            None,
                        )
                        .await;
                    coordinator
                        .tell(
                            ShardTerminated {
                                shard_id,
                                region: myself,
                            },
                            None,
                        )
                        .await;
                });
            }
            None => {
                // absent shards still reply complete
                coordinator
                    .tell(
                        HandOffComplete {
                            shard_id,
                            region: myself,
                        },
                        None,
                    )
                    .await;
            }
        }
    }
}

#[async_trait]
impl<E: Actor> Actor for ShardRegion<E>
where
    E::Msg: Sync,
{
    type Msg = ShardRegionMsg<E>;

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        let address =
            ActorAddress::local(&ctx.system().name(), ctx.myself().path().clone());
        self.coordinator
            .tell(
                RegisterShardRegion {
                    region: Box::new(ctx.myself()),
                    region_ref: ctx.myself().into(),
                    address,
                },
                None,
            )
            .await;
        Ok(())
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, sender: Sender) -> ActorResult {
        match msg {
            ShardRegionMsg::Envelope(env) => {
                let shard_id = env.shard_id.clone();
                match self.shards.get(&shard_id).cloned() {
                    Some(shard) => {
                        ctx.forward(&shard, ShardMsg::Envelope(env), sender).await;
                    }
                    None => {
                        self.buffer(ctx, shard_id, ShardMsg::Envelope(env), sender).await;
                    }
                }
            }
            ShardRegionMsg::Command(RegionCommand::ShardHomeAllocated {
                shard_id, region, ..
            }) => {
                self.shard_home_allocated(ctx, shard_id, region).await;
            }
            ShardRegionMsg::Command(RegionCommand::HandOff { shard_id }) => {
                self.hand_off(ctx, shard_id).await;
            }
            ShardRegionMsg::Passivate(p) => {
                let shard_id = self.extractor.shard_id(&p.entity_id);
                match self.shards.get(&shard_id).cloned() {
                    Some(shard) => {
                        ctx.forward(&shard, ShardMsg::Passivate(p), sender).await;
                    }
                    None => {
                        self.buffer(ctx, shard_id, ShardMsg::Passivate(p), sender).await;
                    }
                }
            }
        }
        Ok(())
    }
}
