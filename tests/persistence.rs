use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use lattice::actors::*;
use lattice::persist::{EventData, InMemoryJournal, Journal, JournalError, Persistence};

#[derive(Clone, Debug)]
pub enum CounterEvent {
    Added(i64),
    Incremented,
}

#[derive(Clone, Debug)]
pub enum CounterMsg {
    Increment,
    Add(i64),
    GetValue,
}

struct Counter {
    persistence: Persistence<CounterEvent>,
    value: i64,
}

impl Counter {
    fn props(journal: Arc<dyn Journal>, persistence_id: &str) -> BoxActorProd<Counter> {
        Props::new_args(
            |(journal, id): (Arc<dyn Journal>, String)| Counter {
                persistence: Persistence::new(journal, id),
                value: 0,
            },
            (journal, persistence_id.to_string()),
        )
    }

    fn apply(value: &mut i64, event: &CounterEvent) {
        match event {
            CounterEvent::Added(n) => *value += n,
            CounterEvent::Incremented => *value += 1,
        }
    }
}

#[async_trait]
impl Actor for Counter {
    type Msg = CounterMsg;

    async fn pre_start(&mut self, _ctx: &Context<Self::Msg>) -> ActorResult {
        for (event, _nr) in self.persistence.replay().await? {
            Counter::apply(&mut self.value, &event);
        }
        Ok(())
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, _sender: Sender) -> ActorResult {
        match msg {
            CounterMsg::Increment => {
                self.persistence.persist(CounterEvent::Incremented).await?;
                Counter::apply(&mut self.value, &CounterEvent::Incremented);
            }
            CounterMsg::Add(n) => {
                self.persistence.persist(CounterEvent::Added(n)).await?;
                Counter::apply(&mut self.value, &CounterEvent::Added(n));
            }
            CounterMsg::GetValue => {
                ctx.reply(self.value).await;
            }
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn recovery_replays_prepopulated_journal() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    journal
        .write_events(
            "ctr-1",
            vec![
                EventData::new(CounterEvent::Added(5)),
                EventData::new(CounterEvent::Incremented),
                EventData::new(CounterEvent::Incremented),
            ],
        )
        .await
        .unwrap();

    let counter = sys
        .actor_of(Counter::props(journal.clone(), "ctr-1"), "counter")
        .await
        .unwrap();

    let value: i64 = counter.ask(CounterMsg::GetValue, None).await.unwrap();
    assert_eq!(value, 7);

    counter.tell(CounterMsg::Increment, None).await;
    counter.tell(CounterMsg::Add(3), None).await;

    let value: i64 = counter.ask(CounterMsg::GetValue, None).await.unwrap();
    assert_eq!(value, 11);

    // the journal now holds five entries, seqNr 1..5, in order
    let mut stream = journal.replay_events("ctr-1", 1, None).await.unwrap();
    let mut entries = Vec::new();
    while let Some(evt) = stream.next().await {
        let evt = evt.unwrap();
        entries.push((evt.sequence_nr, evt.data.downcast::<CounterEvent>().unwrap()));
    }
    assert_eq!(entries.len(), 5);
    assert_eq!(
        entries.iter().map(|(nr, _)| *nr).collect::<Vec<u64>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert!(matches!(entries[3].1, CounterEvent::Incremented));
    assert!(matches!(entries[4].1, CounterEvent::Added(3)));

    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_sent_during_recovery_wait_for_it() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    journal
        .write_events("ctr-2", vec![EventData::new(CounterEvent::Added(40))])
        .await
        .unwrap();

    let counter = sys
        .actor_of(Counter::props(journal, "ctr-2"), "counter")
        .await
        .unwrap();

    // sent immediately after spawn, racing recovery: recovery runs in
    // pre_start, so these are processed strictly afterwards in order
    counter.tell(CounterMsg::Increment, None).await;
    counter.tell(CounterMsg::Increment, None).await;

    let value: i64 = counter.ask(CounterMsg::GetValue, None).await.unwrap();
    assert_eq!(value, 42);

    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_failure_stops_the_actor() {
    let sys = ActorSystem::new().await.unwrap();
    let journal = Arc::new(InMemoryJournal::new());

    // an event this actor cannot recover from
    journal
        .write_events("ctr-3", vec![EventData::new("garbage".to_string())])
        .await
        .unwrap();

    let counter = sys
        .actor_of(Counter::props(journal, "ctr-3"), "counter")
        .await
        .unwrap();

    let result: Result<i64, AskError> = counter
        .ask(CounterMsg::GetValue, Duration::from_millis(500))
        .await;
    assert!(result.is_err());

    sys.shutdown().await;
}

/// A journal whose writes fail, for exercising persist error handling.
struct FailingJournal;

#[async_trait]
impl Journal for FailingJournal {
    async fn write_events(
        &self,
        _persistence_id: &str,
        _events: Vec<EventData>,
    ) -> Result<u64, JournalError> {
        Err(JournalError::WriteFailed("disk on fire".to_string()))
    }

    async fn replay_events(
        &self,
        _persistence_id: &str,
        _from_sequence_nr: u64,
        _to_sequence_nr: Option<u64>,
    ) -> Result<lattice::persist::EventStream, JournalError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn read_highest_sequence_nr(&self, _persistence_id: &str) -> Result<u64, JournalError> {
        Ok(0)
    }
}

struct ResilientCounter {
    inner: Counter,
}

#[async_trait]
impl Actor for ResilientCounter {
    type Msg = CounterMsg;

    fn supervisor_strategy(&self) -> Strategy {
        Strategy::Resume
    }

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        self.inner.pre_start(ctx).await
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, sender: Sender) -> ActorResult {
        self.inner.recv(ctx, msg, sender).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_persist_leaves_state_untouched() {
    let sys = ActorSystem::new().await.unwrap();

    let counter = sys
        .actor_of(
            Props::new(|| ResilientCounter {
                inner: Counter {
                    persistence: Persistence::new(Arc::new(FailingJournal), "ctr-4"),
                    value: 0,
                },
            }),
            "counter",
        )
        .await
        .unwrap();

    // the write fails, the handler errors, Resume drops the message
    counter.tell(CounterMsg::Add(5), None).await;

    let value: i64 = counter.ask(CounterMsg::GetValue, None).await.unwrap();
    assert_eq!(value, 0);

    sys.shutdown().await;
}
