use std::sync::Arc;
use std::time::Duration;

use slog::warn;

use crate::{
    actor::{actor_ref::ask_via, Actor, ActorRef, ActorReference, AskError, DeadLetter},
    sharding::{MessageExtractor, ShardEnvelope, ShardRegionMsg},
    system::ActorSystem,
    Message,
};

/// A synthetic, location-transparent handle for one sharded entity
/// type. Routes each message by the configured extractor pair; a
/// message without an entity id is a routing failure and goes to dead
/// letters with a warning.
pub struct ShardedRef<E: Actor> {
    type_name: String,
    region: ActorRef<ShardRegionMsg<E>>,
    extractor: Arc<dyn MessageExtractor<E::Msg>>,
    system: ActorSystem,
}

impl<E: Actor> Clone for ShardedRef<E> {
    fn clone(&self) -> Self {
        ShardedRef {
            type_name: self.type_name.clone(),
            region: self.region.clone(),
            extractor: self.extractor.clone(),
            system: self.system.clone(),
        }
    }
}

impl<E: Actor> ShardedRef<E> {
    pub(crate) fn new(
        type_name: String,
        region: ActorRef<ShardRegionMsg<E>>,
        extractor: Arc<dyn MessageExtractor<E::Msg>>,
        system: ActorSystem,
    ) -> Self {
        ShardedRef {
            type_name,
            region,
            extractor,
            system,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The region this ref routes through.
    pub fn region(&self) -> &ActorRef<ShardRegionMsg<E>> {
        &self.region
    }

    async fn envelope(&self, msg: E::Msg) -> Option<ShardEnvelope<E::Msg>> {
        match self.extractor.entity_id(&msg) {
            Some(entity_id) => {
                let shard_id = self.extractor.shard_id(&entity_id);
                Some(ShardEnvelope {
                    entity_id,
                    shard_id,
                    msg,
                })
            }
            None => {
                warn!(
                    self.system.log(),
                    "Dropping message with no entity id for sharded type {}", self.type_name
                );
                self.system
                    .publish_dead_letter(DeadLetter {
                        msg: format!("{:?}", msg),
                        sender: None,
                        recipient: self.region.path().clone(),
                    })
                    .await;
                None
            }
        }
    }

    pub async fn tell(&self, msg: E::Msg, sender: crate::actor::Sender) {
        if let Some(env) = self.envelope(msg).await {
            self.region
                .send_msg(ShardRegionMsg::Envelope(env), sender)
                .await;
        }
    }

    /// Ask an entity. The correlation travels inside the forwarded
    /// envelope, so the reply returns directly from the entity to the
    /// waiter; region, shard and coordinator never see it.
    pub async fn ask<R>(
        &self,
        msg: E::Msg,
        timeout: impl Into<Option<Duration>> + Send,
    ) -> Result<R, AskError>
    where
        R: Message,
    {
        let env = match self.envelope(msg).await {
            Some(env) => env,
            None => return Err(AskError::Unreachable),
        };
        ask_via(
            &self.region.cell,
            ShardRegionMsg::Envelope(env),
            timeout.into(),
        )
        .await
    }
}
