use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;

use crate::persist::{EventData, Journal, JournalError};
use crate::Message;

/// The event-sourcing handle a persistent actor owns.
///
/// Wraps a journal under a fixed persistence id and tracks the highest
/// sequence number seen. The owning actor replays in `pre_start`
/// (messages arriving meanwhile wait in the mailbox, so recovery runs
/// before any user message) and calls [`persist`](Persistence::persist)
/// before applying each state change.
///
/// Persist calls are serialized by `&mut self`: a handler's second
/// persist cannot begin until the first completed. On a failed write
/// nothing is applied and `last_sequence_nr` is unchanged; the error
/// propagates to the handler and from there to supervision.
pub struct Persistence<E> {
    journal: Arc<dyn Journal>,
    persistence_id: String,
    last_sequence_nr: u64,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Persistence<E>
where
    E: Message + Sync,
{
    pub fn new(journal: Arc<dyn Journal>, persistence_id: impl Into<String>) -> Self {
        Persistence {
            journal,
            persistence_id: persistence_id.into(),
            last_sequence_nr: 0,
            _marker: PhantomData,
        }
    }

    pub fn persistence_id(&self) -> &str {
        &self.persistence_id
    }

    pub fn last_sequence_nr(&self) -> u64 {
        self.last_sequence_nr
    }

    /// Replays all stored events in order, returning `(event, seqNr)`
    /// pairs for the owner to fold into its state. A replay failure
    /// should fail `pre_start`, stopping the actor with the error as
    /// cause.
    pub async fn replay(&mut self) -> Result<Vec<(E, u64)>, JournalError> {
        let mut stream = self
            .journal
            .replay_events(&self.persistence_id, 1, None)
            .await?;

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            let evt = item?;
            let event = evt.data.downcast::<E>().ok_or(JournalError::BadEvent {
                persistence_id: evt.persistence_id.clone(),
                sequence_nr: evt.sequence_nr,
            })?;
            self.last_sequence_nr = evt.sequence_nr;
            events.push((event, evt.sequence_nr));
        }

        Ok(events)
    }

    /// Appends `event` to the journal. Apply the event to in-memory
    /// state only after this returns Ok.
    pub async fn persist(&mut self, event: E) -> Result<u64, JournalError> {
        let highest = self
            .journal
            .write_events(&self.persistence_id, vec![EventData::new(event)])
            .await?;
        self.last_sequence_nr = highest;
        Ok(highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryJournal;

    #[derive(Clone, Debug, PartialEq)]
    enum CounterEvent {
        Added(i64),
    }

    #[tokio::test]
    async fn persist_then_replay_restores_state() {
        let journal = Arc::new(InMemoryJournal::new());

        {
            let mut persistence: Persistence<CounterEvent> =
                Persistence::new(journal.clone(), "ctr-1");
            persistence.persist(CounterEvent::Added(5)).await.unwrap();
            persistence.persist(CounterEvent::Added(1)).await.unwrap();
            assert_eq!(persistence.last_sequence_nr(), 2);
        }

        // a fresh incarnation folds the same events back
        let mut recovered: Persistence<CounterEvent> = Persistence::new(journal, "ctr-1");
        let mut value = 0;
        let events = recovered.replay().await.unwrap();
        for (event, _nr) in events {
            let CounterEvent::Added(n) = event;
            value += n;
        }

        assert_eq!(value, 6);
        assert_eq!(recovered.last_sequence_nr(), 2);
    }

    #[tokio::test]
    async fn replay_of_foreign_events_fails() {
        let journal = Arc::new(InMemoryJournal::new());
        journal
            .write_events("ctr-2", vec![EventData::new("not a counter".to_string())])
            .await
            .unwrap();

        let mut persistence: Persistence<CounterEvent> = Persistence::new(journal, "ctr-2");
        assert!(matches!(
            persistence.replay().await,
            Err(JournalError::BadEvent { .. })
        ));
    }
}
