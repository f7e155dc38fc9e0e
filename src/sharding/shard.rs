use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use slog::{debug, warn};

use crate::{
    actor::{
        Actor, ActorRef, ActorRefFactory, ActorReference, ActorResult, BoxActorProd, Context,
        Sender,
    },
    sharding::{EntityId, PassivateEntity, ShardEnvelope, ShardId, ShardingSettings},
    system::{ActorSystem, SystemEvent, SystemMsg, Timer},
    Envelope,
};

/// Internal tick driving idle-entity passivation.
#[derive(Clone, Debug)]
pub struct PassivationTick;

pub enum ShardMsg<E: Actor> {
    Envelope(ShardEnvelope<E::Msg>),
    Passivate(PassivateEntity),
    PassivationTick(PassivationTick),
}

impl<E: Actor> Clone for ShardMsg<E> {
    fn clone(&self) -> Self {
        match self {
            ShardMsg::Envelope(env) => ShardMsg::Envelope(env.clone()),
            ShardMsg::Passivate(p) => ShardMsg::Passivate(p.clone()),
            ShardMsg::PassivationTick(t) => ShardMsg::PassivationTick(t.clone()),
        }
    }
}

impl<E: Actor> fmt::Debug for ShardMsg<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShardMsg::Envelope(env) => write!(f, "Envelope({:?})", env),
            ShardMsg::Passivate(p) => write!(f, "Passivate({:?})", p),
            ShardMsg::PassivationTick(_) => f.write_str("PassivationTick"),
        }
    }
}

impl<E: Actor> From<ShardEnvelope<E::Msg>> for ShardMsg<E> {
    fn from(env: ShardEnvelope<E::Msg>) -> Self {
        ShardMsg::Envelope(env)
    }
}

impl<E: Actor> From<PassivateEntity> for ShardMsg<E> {
    fn from(p: PassivateEntity) -> Self {
        ShardMsg::Passivate(p)
    }
}

impl<E: Actor> From<PassivationTick> for ShardMsg<E> {
    fn from(t: PassivationTick) -> Self {
        ShardMsg::PassivationTick(t)
    }
}

/// Hosts the entities of one shard id as child actors named by entity
/// id. Entities spawn lazily on first message and are the shard's
/// supervised children, so stopping the shard terminates every entity
/// first.
pub struct Shard<E: Actor> {
    shard_id: ShardId,
    entity_props: BoxActorProd<E>,
    settings: ShardingSettings,
    entities: HashMap<EntityId, ActorRef<E::Msg>>,
    last_activity: HashMap<EntityId, Instant>,
    // entities mid-passivation; arriving messages wait here and are
    // drained into the fresh incarnation
    passivating: HashMap<EntityId, Vec<Envelope<E::Msg>>>,
    system: Option<ActorSystem>,
    tick: Option<crate::system::ScheduleId>,
}

impl<E: Actor> Shard<E> {
    pub fn new((shard_id, entity_props, settings): (ShardId, BoxActorProd<E>, ShardingSettings)) -> Self {
        Shard {
            shard_id,
            entity_props,
            settings,
            entities: HashMap::new(),
            last_activity: HashMap::new(),
            passivating: HashMap::new(),
            system: None,
            tick: None,
        }
    }

    async fn start_entity(
        &mut self,
        ctx: &Context<ShardMsg<E>>,
        entity_id: &str,
    ) -> Option<ActorRef<E::Msg>> {
        match ctx.actor_of(self.entity_props.clone(), entity_id).await {
            Ok(entity) => {
                self.entities.insert(entity_id.to_string(), entity.clone());
                self.last_activity
                    .insert(entity_id.to_string(), Instant::now());
                Some(entity)
            }
            Err(err) => {
                // a routing failure: the entity id is not a valid actor
                // name or the shard is stopping
                warn!(
                    ctx.system().log(),
                    "Dropping message for entity {} in shard {}: {}",
                    entity_id,
                    self.shard_id,
                    err
                );
                None
            }
        }
    }

    async fn passivate(&mut self, ctx: &Context<ShardMsg<E>>, entity_id: &str) {
        match self.entities.remove(entity_id) {
            Some(entity) => {
                self.last_activity.remove(entity_id);
                self.passivating.insert(entity_id.to_string(), Vec::new());
                ctx.stop(&entity);
            }
            None => {
                debug!(
                    ctx.system().log(),
                    "Ignoring passivation of unknown entity {} in shard {}",
                    entity_id,
                    self.shard_id
                );
            }
        }
    }
}

#[async_trait]
impl<E: Actor> Actor for Shard<E>
where
    E::Msg: Sync,
{
    type Msg = ShardMsg<E>;

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        self.system = Some(ctx.system().clone());
        if let Some(timeout) = self.settings.passivation_timeout {
            let id = ctx.schedule(timeout, timeout, ctx.myself(), None, PassivationTick);
            self.tick = Some(id);
        }
        Ok(())
    }

    async fn post_stop(&mut self) {
        if let (Some(system), Some(tick)) = (&self.system, self.tick.take()) {
            system.cancel_schedule(tick);
        }
        // entities were stopped by the kernel before this hook ran
        self.entities.clear();
        self.last_activity.clear();
        self.passivating.clear();
    }

    async fn sys_recv(&mut self, ctx: &Context<Self::Msg>, msg: SystemMsg, _sender: Sender) {
        if let SystemMsg::Event(SystemEvent::ActorTerminated(terminated)) = msg {
            let entity_id = terminated.actor.name().to_string();
            self.entities.remove(&entity_id);
            self.last_activity.remove(&entity_id);

            // a passivated entity restarts fresh if messages arrived
            // while it was stopping
            if let Some(buffered) = self.passivating.remove(&entity_id) {
                if !buffered.is_empty() {
                    if let Some(entity) = self.start_entity(ctx, &entity_id).await {
                        for env in buffered {
                            let _ = entity.cell.send_msg(env).await;
                        }
                    }
                }
            }
        }
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, sender: Sender) -> ActorResult {
        match msg {
            ShardMsg::Envelope(env) => {
                let entity_id = env.entity_id.clone();

                if let Some(buffer) = self.passivating.get_mut(&entity_id) {
                    buffer.push(Envelope {
                        msg: env.msg,
                        sender,
                        ask: ctx.take_ask(),
                    });
                    return Ok(());
                }

                let entity = match self.entities.get(&entity_id).cloned() {
                    Some(entity) => Some(entity),
                    None => self.start_entity(ctx, &entity_id).await,
                };

                if let Some(entity) = entity {
                    self.last_activity.insert(entity_id, Instant::now());
                    ctx.forward(&entity, env.msg, sender).await;
                }
            }
            ShardMsg::Passivate(p) => {
                self.passivate(ctx, &p.entity_id).await;
            }
            ShardMsg::PassivationTick(_) => {
                if let Some(timeout) = self.settings.passivation_timeout {
                    let idle: Vec<EntityId> = self
                        .last_activity
                        .iter()
                        .filter(|(_, at)| at.elapsed() >= timeout)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for entity_id in idle {
                        self.passivate(ctx, &entity_id).await;
                    }
                }
            }
        }
        Ok(())
    }
}
