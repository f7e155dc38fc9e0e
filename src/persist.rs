//! Event-sourced persistence: the journal contract and the
//! persist-then-apply machinery actors build their durable state on.

pub(crate) mod event_sourced;
pub(crate) mod journal;

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Message;

pub use self::event_sourced::Persistence;
pub use self::journal::InMemoryJournal;

/// An event payload as stored in a journal. Opaque to the runtime:
/// only the persistent actor that owns the persistence id knows the
/// concrete type.
#[derive(Clone)]
pub struct EventData {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: Arc<str>,
}

impl EventData {
    pub fn new<E>(event: E) -> Self
    where
        E: Message + Sync,
    {
        EventData {
            payload: Arc::new(event),
            type_name: Arc::from(std::any::type_name::<E>()),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Clones the payload back out as `E`. `None` when the stored type
    /// differs.
    pub fn downcast<E>(&self) -> Option<E>
    where
        E: Message,
    {
        self.payload.downcast_ref::<E>().cloned()
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EventData[{}]", self.type_name)
    }
}

/// A journal entry: `(persistenceId, sequenceNr, timestamp, event)`.
///
/// Sequence numbers are strictly monotonic per persistence id,
/// starting at 1, with no gaps.
#[derive(Clone, Debug)]
pub struct PersistedEvent {
    pub persistence_id: String,
    pub sequence_nr: u64,
    pub timestamp: SystemTime,
    pub data: EventData,
}

/// The lazy, finite, non-restartable replay sequence.
pub type EventStream = BoxStream<'static, Result<PersistedEvent, JournalError>>;

/// The journal plugin contract.
///
/// `write_events` atomically appends the batch in order, assigning
/// contiguous sequence numbers after the current highest; either all
/// events are appended or none. No ordering relationship is promised
/// across different persistence ids.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Appends `events`, returning the highest sequence number
    /// assigned.
    async fn write_events(
        &self,
        persistence_id: &str,
        events: Vec<EventData>,
    ) -> Result<u64, JournalError>;

    /// Yields the stored events whose sequence number lies in
    /// `[from_sequence_nr, to_sequence_nr]`, in order.
    async fn replay_events(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
        to_sequence_nr: Option<u64>,
    ) -> Result<EventStream, JournalError>;

    /// Returns 0 for unknown persistence ids.
    async fn read_highest_sequence_nr(&self, persistence_id: &str) -> Result<u64, JournalError>;
}

#[derive(Clone)]
pub enum JournalError {
    WriteFailed(String),
    ReplayFailed(String),
    /// A replayed event was not of the type the actor persists.
    BadEvent {
        persistence_id: String,
        sequence_nr: u64,
    },
}

impl Error for JournalError {}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JournalError::WriteFailed(cause) => {
                write!(f, "Journal write failed. Cause: {}", cause)
            }
            JournalError::ReplayFailed(cause) => {
                write!(f, "Journal replay failed. Cause: {}", cause)
            }
            JournalError::BadEvent {
                persistence_id,
                sequence_nr,
            } => write!(
                f,
                "Journal replay failed. Cause: Unexpected event type ({} at {})",
                persistence_id, sequence_nr
            ),
        }
    }
}

impl fmt::Debug for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
