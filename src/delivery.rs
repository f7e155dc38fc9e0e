//! At-least-once delivery on top of the journal: a persisted outbox,
//! a retry loop, and a confirmation actor the consumer replies to.
//!
//! This is a library-level service, not an actor base class. `send`
//! persists an `OutboundMessageSent` event, delivers a
//! [`ReliableEnvelope`] to the target with the confirmation actor set
//! as the reply sender, and resends on a timer until the consumer's
//! [`DeliveryConfirmation`] arrives or retries are exhausted.
//!
//! The guarantee is at-least-once delivery to the recipient's mailbox;
//! retries may reorder, and processing-once is the recipient's concern.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use slog::{debug, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    actor::{
        Actor, ActorPath, ActorReference, ActorResult, BasicActorRef, BoxedTell, Context,
        DeadLetter, Props, Sender, Tell,
    },
    persist::{Journal, JournalError, Persistence},
    system::ActorSystem,
    Message,
};

pub type DeliveryId = Uuid;

/// The fixed persistence id the outbox journals under.
pub const OUTBOX_PERSISTENCE_ID: &str = "reliable-delivery-outbox";

/// A recipient of reliable sends. The target actor's message type must
/// accept `ReliableEnvelope` (`From<ReliableEnvelope>`).
pub type DeliveryTarget = BoxedTell<ReliableEnvelope>;

/// The original message, kept cloneable for resends and recovery.
#[derive(Clone)]
pub struct DeliveryPayload {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: Arc<str>,
}

impl DeliveryPayload {
    pub fn new<T>(msg: T) -> Self
    where
        T: Message + Sync,
    {
        DeliveryPayload {
            inner: Arc::new(msg),
            type_name: Arc::from(std::any::type_name::<T>()),
        }
    }

    /// Clones the original message back out as `T`.
    pub fn downcast<T>(&self) -> Option<T>
    where
        T: Message,
    {
        self.inner.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for DeliveryPayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DeliveryPayload[{}]", self.type_name)
    }
}

/// Wrapper delivered to the consumer. After successfully processing
/// `msg`, the consumer sends `DeliveryConfirmation(delivery_id,
/// self path)` to the envelope's reply sender.
#[derive(Clone, Debug)]
pub struct ReliableEnvelope {
    pub delivery_id: DeliveryId,
    pub sender: Sender,
    pub msg: DeliveryPayload,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfirmation {
    pub delivery_id: DeliveryId,
    pub recipient: ActorPath,
}

#[derive(Clone, Debug)]
pub struct OutboundMessageState {
    pub delivery_id: DeliveryId,
    pub target: DeliveryTarget,
    pub msg: DeliveryPayload,
    pub sender: Sender,
    pub sent_at: SystemTime,
    pub retry_count: u32,
}

#[derive(Clone, Debug)]
pub enum OutboxEvent {
    MessageSent(OutboundMessageState),
    MessageConfirmed {
        delivery_id: DeliveryId,
        recipient: ActorPath,
    },
}

#[derive(Clone)]
pub struct DeliverySettings {
    pub retry_interval: Duration,
    pub max_retries: u32,
    /// Where exhausted messages go. `None` routes them to the system
    /// dead letters channel.
    pub dead_letter_target: Option<DeliveryTarget>,
}

impl DeliverySettings {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        DeliverySettings {
            retry_interval: cfg.delivery.retry_interval,
            max_retries: cfg.delivery.max_retries,
            dead_letter_target: None,
        }
    }
}

struct OutboxState {
    persistence: Persistence<OutboxEvent>,
    outbox: HashMap<DeliveryId, OutboundMessageState>,
}

struct DeliveryCore {
    system: ActorSystem,
    settings: DeliverySettings,
    state: tokio::sync::Mutex<OutboxState>,
}

impl DeliveryCore {
    async fn confirm(&self, delivery_id: DeliveryId, recipient: ActorPath) {
        let mut state = self.state.lock().await;
        if !state.outbox.contains_key(&delivery_id) {
            // a retransmission confirmation may race the removal
            return;
        }

        match state
            .persistence
            .persist(OutboxEvent::MessageConfirmed {
                delivery_id,
                recipient,
            })
            .await
        {
            Ok(_) => {
                state.outbox.remove(&delivery_id);
            }
            Err(err) => {
                warn!(
                    self.system.log(),
                    "Failed to persist delivery confirmation {}: {}", delivery_id, err
                );
            }
        }
    }

    async fn run_retries(&self, confirm_ref: &BasicActorRef) {
        let mut state = self.state.lock().await;

        let exhausted: Vec<DeliveryId> = state
            .outbox
            .values()
            .filter(|entry| entry.retry_count >= self.settings.max_retries)
            .map(|entry| entry.delivery_id)
            .collect();

        // exhausted entries leave the outbox without a persisted event;
        // the final state is implied by policy
        for id in exhausted {
            if let Some(entry) = state.outbox.remove(&id) {
                debug!(
                    self.system.log(),
                    "Delivery {} exhausted after {} retries", id, entry.retry_count
                );
                self.dead_letter(entry).await;
            }
        }

        let mut resends = Vec::new();
        for entry in state.outbox.values_mut() {
            entry.retry_count += 1;
            resends.push((entry.target.clone(), ReliableEnvelope {
                delivery_id: entry.delivery_id,
                sender: entry.sender.clone(),
                msg: entry.msg.clone(),
            }));
        }
        drop(state);

        for (target, envelope) in resends {
            target
                .tell(envelope, Some(confirm_ref.clone()))
                .await;
        }
    }

    async fn dead_letter(&self, entry: OutboundMessageState) {
        match &self.settings.dead_letter_target {
            Some(target) => {
                target
                    .tell(
                        ReliableEnvelope {
                            delivery_id: entry.delivery_id,
                            sender: entry.sender.clone(),
                            msg: entry.msg.clone(),
                        },
                        None,
                    )
                    .await;
            }
            None => {
                self.system
                    .publish_dead_letter(DeadLetter {
                        msg: format!("{:?}", entry.msg),
                        sender: entry.sender.clone(),
                        recipient: entry.target.path().clone(),
                    })
                    .await;
            }
        }
    }
}

/// The outbox service handle.
pub struct ReliableDelivery {
    core: Arc<DeliveryCore>,
    confirm_ref: BasicActorRef,
    retry_task: JoinHandle<()>,
}

impl ReliableDelivery {
    /// Creates the service with settings from the system config,
    /// recovering any outbox state found under
    /// [`OUTBOX_PERSISTENCE_ID`].
    pub async fn new(
        system: &ActorSystem,
        journal: Arc<dyn Journal>,
    ) -> Result<Self, DeliveryError> {
        let settings = DeliverySettings::from_config(system.config());
        Self::with_settings(system, journal, settings).await
    }

    pub async fn with_settings(
        system: &ActorSystem,
        journal: Arc<dyn Journal>,
        settings: DeliverySettings,
    ) -> Result<Self, DeliveryError> {
        let mut persistence = Persistence::new(journal, OUTBOX_PERSISTENCE_ID);

        // rebuild the outbox by folding Sent and Confirmed
        let mut outbox = HashMap::new();
        for (event, _nr) in persistence.replay().await? {
            match event {
                OutboxEvent::MessageSent(state) => {
                    outbox.insert(state.delivery_id, state);
                }
                OutboxEvent::MessageConfirmed { delivery_id, .. } => {
                    outbox.remove(&delivery_id);
                }
            }
        }

        let core = Arc::new(DeliveryCore {
            system: system.clone(),
            settings,
            state: tokio::sync::Mutex::new(OutboxState {
                persistence,
                outbox,
            }),
        });

        let name = format!("delivery-{}", Uuid::new_v4().to_simple());
        let confirm_ref = system
            .provider()
            .create_actor_with(
                Props::new_args(ConfirmationActor::new, core.clone()),
                &name,
                &system.sys_root(),
                system,
                0,
            )
            .await
            .map_err(|e| DeliveryError::Spawn(e.to_string()))?;
        let confirm_ref = BasicActorRef::from(confirm_ref);

        let retry_core = core.clone();
        let retry_confirm = confirm_ref.clone();
        let retry_task = system.handle().spawn(async move {
            let mut tick = tokio::time::interval(retry_core.settings.retry_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // the immediate first tick
            loop {
                tick.tick().await;
                retry_core.run_retries(&retry_confirm).await;
            }
        });

        Ok(ReliableDelivery {
            core,
            confirm_ref,
            retry_task,
        })
    }

    /// Persists and fires the first attempt of an at-least-once send.
    pub async fn send<T>(
        &self,
        target: DeliveryTarget,
        msg: T,
        sender: Sender,
    ) -> Result<DeliveryId, DeliveryError>
    where
        T: Message + Sync,
    {
        let delivery_id = Uuid::new_v4();
        let entry = OutboundMessageState {
            delivery_id,
            target: target.clone(),
            msg: DeliveryPayload::new(msg),
            sender,
            sent_at: SystemTime::now(),
            retry_count: 0,
        };

        {
            let mut state = self.core.state.lock().await;
            state
                .persistence
                .persist(OutboxEvent::MessageSent(entry.clone()))
                .await?;
            state.outbox.insert(delivery_id, entry.clone());
        }

        target
            .tell(
                ReliableEnvelope {
                    delivery_id,
                    sender: entry.sender.clone(),
                    msg: entry.msg.clone(),
                },
                Some(self.confirm_ref.clone()),
            )
            .await;

        Ok(delivery_id)
    }

    /// Marks a delivery as confirmed. Unknown ids are silently ignored.
    pub async fn confirm(&self, delivery_id: DeliveryId, recipient: ActorPath) {
        self.core.confirm(delivery_id, recipient).await
    }

    pub async fn outbox_size(&self) -> usize {
        self.core.state.lock().await.outbox.len()
    }

    /// Stops the retry loop and the confirmation actor.
    pub fn stop(&self) {
        self.retry_task.abort();
        self.confirm_ref
            .sys_tell(crate::system::SystemCmd::Stop.into());
    }
}

impl Drop for ReliableDelivery {
    fn drop(&mut self) {
        self.retry_task.abort();
    }
}

/// Receives `DeliveryConfirmation`s from consumers and forwards them
/// to the outbox.
struct ConfirmationActor {
    core: Arc<DeliveryCore>,
}

impl ConfirmationActor {
    fn new(core: Arc<DeliveryCore>) -> Self {
        ConfirmationActor { core }
    }
}

#[async_trait]
impl Actor for ConfirmationActor {
    type Msg = DeliveryConfirmation;

    async fn recv(&mut self, _: &Context<Self::Msg>, msg: Self::Msg, _: Sender) -> ActorResult {
        self.core.confirm(msg.delivery_id, msg.recipient).await;
        Ok(())
    }
}

pub enum DeliveryError {
    Journal(JournalError),
    Spawn(String),
}

impl From<JournalError> for DeliveryError {
    fn from(err: JournalError) -> Self {
        DeliveryError::Journal(err)
    }
}

impl Error for DeliveryError {}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeliveryError::Journal(err) => write!(f, "Reliable delivery failed. Cause: {}", err),
            DeliveryError::Spawn(cause) => write!(
                f,
                "Reliable delivery failed. Cause: confirmation actor not started ({})",
                cause
            ),
        }
    }
}

impl fmt::Debug for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
