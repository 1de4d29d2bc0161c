//! Payload transition tables
//!
//! A projector registers one handler per payload type tag when it is built.
//! Replay dispatches by looking the tag up; nothing is inspected at runtime.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{ReplayError, ReplayResult};
use crate::types::Event;

/// Outcome of running a handler against the current payload
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<P> {
    /// The event produces this next payload
    Applied(P),
    /// The event does not apply to this payload/version; state stays as is
    NotApplicable,
}

impl<P> Transition<P> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

type Handler<P> = Box<dyn Fn(&P, &Event) -> ReplayResult<Transition<P>> + Send + Sync>;

/// Map from payload type tag to transition handler
pub struct TransitionTable<P> {
    handlers: HashMap<String, Handler<P>>,
}

impl<P: 'static> TransitionTable<P> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler receiving the payload deserialized as `E`
    pub fn on<E, F>(mut self, payload_type: &str, handler: F) -> Self
    where
        E: DeserializeOwned + 'static,
        F: Fn(&P, E, &Event) -> Transition<P> + Send + Sync + 'static,
    {
        let tag = payload_type.to_string();
        self.handlers.insert(
            payload_type.to_string(),
            Box::new(move |payload, event| {
                let data: E = event
                    .parse_payload()
                    .map_err(|source| ReplayError::PayloadDeserialization {
                        payload_type: tag.clone(),
                        source,
                    })?;
                Ok(handler(payload, data, event))
            }),
        );
        self
    }

    /// Register a handler that reads the raw event
    pub fn on_event<F>(mut self, payload_type: &str, handler: F) -> Self
    where
        F: Fn(&P, &Event) -> Transition<P> + Send + Sync + 'static,
    {
        self.handlers.insert(
            payload_type.to_string(),
            Box::new(move |payload, event| Ok(handler(payload, event))),
        );
        self
    }

    /// Known type that never changes this payload
    pub fn ignore(self, payload_type: &str) -> Self {
        self.on_event(payload_type, |_, _| Transition::NotApplicable)
    }

    pub fn handles(&self, payload_type: &str) -> bool {
        self.handlers.contains_key(payload_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for `event.payload_type`
    pub fn apply(&self, payload: &P, event: &Event) -> ReplayResult<Transition<P>> {
        let handler = self
            .handlers
            .get(&event.payload_type)
            .ok_or_else(|| ReplayError::UnknownPayloadType(event.payload_type.clone()))?;
        handler(payload, event)
    }
}

impl<P: 'static> Default for TransitionTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for TransitionTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("TransitionTable").field("payload_types", &types).finish()
    }
}
