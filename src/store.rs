//! Stores: bounded synchronization channels with a get/put rendezvous.
//!
//! A store pairs producers and consumers. Consumers that find nothing to
//! take, and producers that cannot hand off, park a `Waiting` placeholder in
//! the store's request queues; the matching operation later finishes that
//! placeholder and emits continuation events carrying the payload. Blocking
//! stores never park payloads in the buffer: every put waits for a consumer,
//! which makes them behave as a zero-capacity rendezvous regardless of the
//! configured capacity.
//!
//! Every event returned in a [`StoreResponse`] must be handed back to the
//! scheduler through the step outcome's `next` list; the store only records
//! placeholders, it does not insert them into the timeline.

use std::collections::VecDeque;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventId, ProcessCall, StateData, StoreId, Timestamp};
use crate::simulation::Simulation;

/// Queue order applied uniformly to the buffer and both request queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Discipline {
    /// Oldest entry first
    #[default]
    Fifo,
    /// Newest entry first
    Lifo,
}

impl FromStr for Discipline {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "LIFO" => Ok(Self::Lifo),
            other => Err(SimError::UnsupportedDiscipline(other.to_string())),
        }
    }
}

impl std::fmt::Display for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO"),
            Self::Lifo => write!(f, "LIFO"),
        }
    }
}

/// Store configuration; defaults to a blocking FIFO rendezvous of capacity 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `None` means unbounded
    pub capacity: Option<usize>,
    pub blocking: bool,
    pub discipline: Discipline,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: Some(1),
            blocking: true,
            discipline: Discipline::Fifo,
        }
    }
}

/// A bounded queue with parked items and blocked producer/consumer requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    /// `None` means unbounded
    pub capacity: Option<usize>,
    pub blocking: bool,
    pub discipline: Discipline,
    /// Items parked by successful non-blocking puts
    pub buffer: VecDeque<Event>,
    /// Waiting placeholders of blocked consumers
    #[serde(rename = "getRequests")]
    pub get_requests: VecDeque<Event>,
    /// Waiting placeholders of blocked producers
    #[serde(rename = "putRequests")]
    pub put_requests: VecDeque<Event>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            id: StoreId::new(),
            capacity: config.capacity,
            blocking: config.blocking,
            discipline: config.discipline,
            buffer: VecDeque::new(),
            get_requests: VecDeque::new(),
            put_requests: VecDeque::new(),
        }
    }

    /// Blocking FIFO handoff (the default configuration)
    pub fn rendezvous() -> Self {
        Self::new(StoreConfig::default())
    }

    /// Non-blocking store parking up to `capacity` items
    pub fn buffered(capacity: usize, discipline: Discipline) -> Self {
        Self::new(StoreConfig {
            capacity: Some(capacity),
            blocking: false,
            discipline,
        })
    }

    fn has_space(&self) -> bool {
        self.capacity.map_or(true, |cap| self.buffer.len() < cap)
    }

    fn take(queue: &mut VecDeque<Event>, discipline: Discipline) -> Option<Event> {
        match discipline {
            Discipline::Fifo => queue.pop_front(),
            Discipline::Lifo => queue.pop_back(),
        }
    }

    fn take_buffered(&mut self) -> Option<Event> {
        Self::take(&mut self.buffer, self.discipline)
    }

    fn take_get_request(&mut self) -> Option<Event> {
        Self::take(&mut self.get_requests, self.discipline)
    }

    fn take_put_request(&mut self) -> Option<Event> {
        Self::take(&mut self.put_requests, self.discipline)
    }
}

/// Events produced by a store operation.
///
/// `step` is the caller's own follow-up: a continuation when the operation
/// completed, or a waiting placeholder when it blocked. `resume` holds
/// continuations of counterparties unblocked by this operation.
#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub step: Event,
    pub resume: Vec<Event>,
}

/// A continuation: fires immediately, resumes the parent's process
fn continuation(
    parent: Option<EventId>,
    process_type: &str,
    data: Option<StateData>,
    at: Timestamp,
) -> Event {
    let mut call = ProcessCall::new(process_type).inheriting();
    call.data = data;
    let mut event = Event::at(at).with_process(call);
    event.parent = parent;
    event
}

impl Simulation {
    /// Take one item from the store, or park a waiting placeholder.
    ///
    /// The returned `step` either carries the payload (continuation of the
    /// calling consumer) or is the parked placeholder. When a blocked
    /// producer was matched, its waiting event is finished here and its
    /// continuation returned in `resume`.
    pub fn get(&mut self, event: &Event, store_id: StoreId) -> SimResult<StoreResponse> {
        let now = self.current_time;
        let store = self
            .stores
            .get_mut(&store_id)
            .ok_or(SimError::StoreNotFound(store_id))?;

        if let Some(item) = store.take_buffered() {
            let payload = item.process.data.ok_or(SimError::MissingPayload {
                store_id,
                event_id: item.id,
            })?;
            trace!(store = %store_id, consumer = %event.id, "get served from buffer");
            let step = continuation(
                Some(event.id),
                &event.process.process_type,
                Some(payload),
                now,
            );
            return Ok(StoreResponse {
                step,
                resume: Vec::new(),
            });
        }

        if let Some(waiter) = store.take_put_request() {
            let payload = waiter
                .process
                .data
                .clone()
                .ok_or(SimError::MissingPayload {
                    store_id,
                    event_id: waiter.id,
                })?;
            trace!(store = %store_id, consumer = %event.id, producer = ?waiter.parent, "get matched a blocked producer");
            let step = continuation(
                Some(event.id),
                &event.process.process_type,
                Some(payload),
                now,
            );
            let resume = continuation(waiter.parent, &waiter.process.process_type, None, now);
            self.timeline.mark_finished(waiter.id, now);
            return Ok(StoreResponse {
                step,
                resume: vec![resume],
            });
        }

        let placeholder =
            continuation(Some(event.id), &event.process.process_type, None, now).waiting();
        store.get_requests.push_back(placeholder.clone());
        trace!(store = %store_id, consumer = %event.id, "get blocked");
        Ok(StoreResponse {
            step: placeholder,
            resume: Vec::new(),
        })
    }

    /// Hand one item to the store, or park a waiting placeholder.
    ///
    /// A matched blocked consumer is finished here; its continuation (which
    /// carries the payload) becomes `step`'s counterpart while the producer's
    /// own continuation is returned in `resume`. Non-blocking puts with
    /// buffer space park the payload and let the producer proceed at once.
    pub fn put(
        &mut self,
        event: &Event,
        store_id: StoreId,
        payload: StateData,
    ) -> SimResult<StoreResponse> {
        let now = self.current_time;
        let store = self
            .stores
            .get_mut(&store_id)
            .ok_or(SimError::StoreNotFound(store_id))?;

        if let Some(waiter) = store.take_get_request() {
            trace!(store = %store_id, producer = %event.id, consumer = ?waiter.parent, "put matched a blocked consumer");
            let step = continuation(
                waiter.parent,
                &waiter.process.process_type,
                Some(payload),
                now,
            );
            let resume = continuation(Some(event.id), &event.process.process_type, None, now);
            self.timeline.mark_finished(waiter.id, now);
            return Ok(StoreResponse {
                step,
                resume: vec![resume],
            });
        }

        if !store.blocking && store.has_space() {
            let parked = continuation(
                Some(event.id),
                &event.process.process_type,
                Some(payload),
                now,
            );
            store.buffer.push_back(parked);
            trace!(store = %store_id, producer = %event.id, buffered = store.buffer.len(), "put parked in buffer");
            let step = continuation(Some(event.id), &event.process.process_type, None, now);
            return Ok(StoreResponse {
                step,
                resume: Vec::new(),
            });
        }

        let placeholder = continuation(
            Some(event.id),
            &event.process.process_type,
            Some(payload),
            now,
        )
        .waiting();
        store.put_requests.push_back(placeholder.clone());
        trace!(store = %store_id, producer = %event.id, "put blocked");
        Ok(StoreResponse {
            step: placeholder,
            resume: Vec::new(),
        })
    }
}
