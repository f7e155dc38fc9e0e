use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lattice::actors::*;
use lattice::delivery::{
    DeliveryConfirmation, DeliverySettings, OutboxEvent, ReliableDelivery, ReliableEnvelope,
    OUTBOX_PERSISTENCE_ID,
};
use lattice::persist::{InMemoryJournal, Persistence};

#[derive(Clone)]
pub struct TestProbe<T>(mpsc::UnboundedSender<T>);

impl<T> TestProbe<T> {
    fn event(&self, evt: T) {
        let _ = self.0.send(evt);
    }
}

impl<T> fmt::Debug for TestProbe<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TestProbe")
    }
}

fn probe<T>() -> (TestProbe<T>, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TestProbe(tx), rx)
}

async fn listen_one<T>(listen: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(3), listen.recv())
        .await
        .expect("probe timed out")
        .expect("probe closed")
}

#[derive(Clone, Debug)]
pub struct Order {
    pub item: String,
}

#[derive(Clone, Debug)]
pub enum ConsumerMsg {
    Delivery(ReliableEnvelope),
}

impl From<ReliableEnvelope> for ConsumerMsg {
    fn from(env: ReliableEnvelope) -> Self {
        ConsumerMsg::Delivery(env)
    }
}

/// Confirms a delivery only from its `confirm_from`-th arrival on,
/// simulating lost confirmations.
struct LossyConsumer {
    confirm_from: u32,
    arrivals: HashMap<lattice::delivery::DeliveryId, u32>,
    probe: TestProbe<String>,
}

#[async_trait]
impl Actor for LossyConsumer {
    type Msg = ConsumerMsg;

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, sender: Sender) -> ActorResult {
        let ConsumerMsg::Delivery(env) = msg;

        let seen = self.arrivals.entry(env.delivery_id).or_insert(0);
        *seen += 1;

        let order: Order = env.msg.downcast().expect("payload type");
        self.probe.event(order.item);

        if *seen >= self.confirm_from {
            if let Some(sender) = sender {
                let _ = sender
                    .try_tell(
                        DeliveryConfirmation {
                            delivery_id: env.delivery_id,
                            recipient: ctx.myself().path().clone(),
                        },
                        None,
                    )
                    .await;
            }
        }
        Ok(())
    }
}

fn consumer_props(confirm_from: u32, probe: TestProbe<String>) -> BoxActorProd<LossyConsumer> {
    Props::new_args(
        |(confirm_from, probe)| LossyConsumer {
            confirm_from,
            arrivals: HashMap::new(),
            probe,
        },
        (confirm_from, probe),
    )
}

fn fast_settings() -> DeliverySettings {
    DeliverySettings {
        retry_interval: Duration::from_millis(50),
        max_retries: 5,
        dead_letter_target: None,
    }
}

async fn outbox_events(journal: &InMemoryJournal) -> Vec<OutboxEvent> {
    let mut persistence: Persistence<OutboxEvent> =
        Persistence::new(Arc::new(journal.clone()), OUTBOX_PERSISTENCE_ID);
    persistence
        .replay()
        .await
        .unwrap()
        .into_iter()
        .map(|(event, _)| event)
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_confirmation_is_retried_until_confirmed() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    let (arrival_probe, mut arrivals) = probe();
    let consumer = sys
        .actor_of(consumer_props(2, arrival_probe), "consumer")
        .await
        .unwrap();

    let delivery = ReliableDelivery::with_settings(&sys, journal.clone(), fast_settings())
        .await
        .unwrap();

    let id = delivery
        .send(
            Box::new(consumer.clone()),
            Order {
                item: "flux capacitor".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    // first arrival is ignored, the retry is confirmed
    assert_eq!(listen_one(&mut arrivals).await, "flux capacitor");
    assert_eq!(listen_one(&mut arrivals).await, "flux capacitor");

    // the outbox drains shortly after the confirmation
    let mut empty = false;
    for _ in 0..20 {
        if delivery.outbox_size().await == 0 {
            empty = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(empty, "outbox never drained");

    // exactly one Sent and one Confirmed event, same delivery id
    let events = outbox_events(&journal).await;
    assert_eq!(events.len(), 2);
    match (&events[0], &events[1]) {
        (
            OutboxEvent::MessageSent(state),
            OutboxEvent::MessageConfirmed { delivery_id, .. },
        ) => {
            assert_eq!(state.delivery_id, id);
            assert_eq!(*delivery_id, id);
        }
        other => panic!("unexpected event sequence: {:?}", other),
    }

    delivery.stop();
    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_dead_letter_the_message() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    let (arrival_probe, mut arrivals) = probe();
    // never confirms
    let consumer = sys
        .actor_of(consumer_props(u32::MAX, arrival_probe), "consumer")
        .await
        .unwrap();

    let settings = DeliverySettings {
        retry_interval: Duration::from_millis(30),
        max_retries: 2,
        dead_letter_target: None,
    };
    let delivery = ReliableDelivery::with_settings(&sys, journal.clone(), settings)
        .await
        .unwrap();

    delivery
        .send(
            Box::new(consumer.clone()),
            Order {
                item: "unobtainium".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    // initial send plus two retries
    for _ in 0..3 {
        listen_one(&mut arrivals).await;
    }

    let mut empty = false;
    for _ in 0..20 {
        if delivery.outbox_size().await == 0 {
            empty = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(empty, "exhausted entry still in outbox");

    // exhaustion persists nothing: only the Sent event remains
    let events = outbox_events(&journal).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], OutboxEvent::MessageSent(_)));

    delivery.stop();
    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn outbox_recovers_from_the_journal() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    let (arrival_probe, mut arrivals) = probe();
    let consumer = sys
        .actor_of(consumer_props(2, arrival_probe), "consumer")
        .await
        .unwrap();

    // first incarnation: send once (ignored by the consumer), then die
    // before any retry
    {
        let slow = DeliverySettings {
            retry_interval: Duration::from_secs(3600),
            max_retries: 5,
            dead_letter_target: None,
        };
        let delivery = ReliableDelivery::with_settings(&sys, journal.clone(), slow)
            .await
            .unwrap();
        delivery
            .send(
                Box::new(consumer.clone()),
                Order {
                    item: "warp coil".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        listen_one(&mut arrivals).await;
        delivery.stop();
    }

    // second incarnation folds the journal back into the outbox and
    // resumes retrying
    let delivery = ReliableDelivery::with_settings(&sys, journal.clone(), fast_settings())
        .await
        .unwrap();
    assert_eq!(delivery.outbox_size().await, 1);

    // the retry reaches the consumer, which confirms its second arrival
    listen_one(&mut arrivals).await;

    let mut empty = false;
    for _ in 0..20 {
        if delivery.outbox_size().await == 0 {
            empty = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(empty, "recovered outbox never drained");

    delivery.stop();
    sys.shutdown().await;
}
