use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;

use crate::persist::{EventData, EventStream, Journal, JournalError, PersistedEvent};

/// The default journal plugin: an in-process store, suitable for tests
/// and single-node systems. Entries are kept per persistence id in
/// append order, so the vector index encodes the sequence number.
#[derive(Clone, Default)]
pub struct InMemoryJournal {
    store: Arc<DashMap<String, Vec<PersistedEvent>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        InMemoryJournal::default()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn write_events(
        &self,
        persistence_id: &str,
        events: Vec<EventData>,
    ) -> Result<u64, JournalError> {
        if events.is_empty() {
            return Err(JournalError::WriteFailed("empty batch".to_string()));
        }

        // the entry guard makes the append atomic per persistence id
        let mut entry = self.store.entry(persistence_id.to_string()).or_default();
        let mut next = entry.len() as u64 + 1;
        let timestamp = SystemTime::now();

        for data in events {
            entry.push(PersistedEvent {
                persistence_id: persistence_id.to_string(),
                sequence_nr: next,
                timestamp,
                data,
            });
            next += 1;
        }

        Ok(entry.len() as u64)
    }

    async fn replay_events(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
        to_sequence_nr: Option<u64>,
    ) -> Result<EventStream, JournalError> {
        let from = from_sequence_nr.max(1);

        let events: Vec<PersistedEvent> = match self.store.get(persistence_id) {
            Some(entry) => entry
                .iter()
                .filter(|e| {
                    e.sequence_nr >= from
                        && to_sequence_nr.map_or(true, |to| e.sequence_nr <= to)
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let stream: EventStream = Box::pin(stream::iter(events.into_iter().map(Ok)));
        Ok(stream)
    }

    async fn read_highest_sequence_nr(&self, persistence_id: &str) -> Result<u64, JournalError> {
        Ok(self
            .store
            .get(persistence_id)
            .map(|entry| entry.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(journal: &InMemoryJournal, id: &str, from: u64) -> Vec<(u64, String)> {
        let mut stream = journal.replay_events(id, from, None).await.unwrap();
        let mut out = Vec::new();
        while let Some(evt) = stream.next().await {
            let evt = evt.unwrap();
            out.push((evt.sequence_nr, evt.data.downcast::<String>().unwrap()));
        }
        out
    }

    #[tokio::test]
    async fn sequence_numbers_are_contiguous_from_one() {
        let journal = InMemoryJournal::new();

        journal
            .write_events("a-1", vec![EventData::new("x".to_string())])
            .await
            .unwrap();
        let highest = journal
            .write_events(
                "a-1",
                vec![
                    EventData::new("y".to_string()),
                    EventData::new("z".to_string()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(highest, 3);
        assert_eq!(
            collect(&journal, "a-1", 1).await,
            vec![
                (1, "x".to_string()),
                (2, "y".to_string()),
                (3, "z".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn replay_respects_bounds() {
        let journal = InMemoryJournal::new();
        for s in &["a", "b", "c", "d"] {
            journal
                .write_events("a-1", vec![EventData::new(s.to_string())])
                .await
                .unwrap();
        }

        assert_eq!(
            collect(&journal, "a-1", 3).await,
            vec![(3, "c".to_string()), (4, "d".to_string())]
        );

        let mut bounded = journal.replay_events("a-1", 2, Some(3)).await.unwrap();
        let mut nrs = Vec::new();
        while let Some(evt) = bounded.next().await {
            nrs.push(evt.unwrap().sequence_nr);
        }
        assert_eq!(nrs, vec![2, 3]);
    }

    #[tokio::test]
    async fn unknown_id_is_empty() {
        let journal = InMemoryJournal::new();
        assert_eq!(journal.read_highest_sequence_nr("nope").await.unwrap(), 0);
        assert!(collect(&journal, "nope", 1).await.is_empty());
    }

    #[tokio::test]
    async fn ids_are_isolated() {
        let journal = InMemoryJournal::new();
        journal
            .write_events("a-1", vec![EventData::new("a".to_string())])
            .await
            .unwrap();
        journal
            .write_events("b-1", vec![EventData::new("b".to_string())])
            .await
            .unwrap();

        assert_eq!(journal.read_highest_sequence_nr("a-1").await.unwrap(), 1);
        assert_eq!(journal.read_highest_sequence_nr("b-1").await.unwrap(), 1);
    }
}
