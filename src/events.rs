//! Typed event bus for sprint lifecycle events.
//!
//! The bus is a mapping from event kind to an ordered list of handlers,
//! invoked synchronously in registration order on emit. Handlers may emit
//! further events during dispatch: the handler list is snapshotted before
//! invocation so re-entry never deadlocks, and nested emits beyond a
//! bounded depth are dropped with a warning so a handler cycle cannot run
//! unbounded.

use crate::state::SprintPhase;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Nested emit depth above which events are dropped.
const MAX_EMIT_DEPTH: usize = 8;

thread_local! {
    static EMIT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Everything the presentation and notification layers may observe.
#[derive(Debug, Clone)]
pub enum SprintEvent {
    PhaseChanged {
        from: SprintPhase,
        to: SprintPhase,
    },
    IssueFailed {
        issue_number: u64,
        title: String,
        reason: String,
    },
    IssueSucceeded {
        issue_number: u64,
        title: String,
    },
    SprintPaused {
        phase: SprintPhase,
    },
    SprintResumed {
        phase: SprintPhase,
    },
    SprintComplete {
        sprint_number: u32,
    },
    SprintError {
        message: String,
    },
}

/// Discriminant used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PhaseChange,
    IssueFail,
    IssueSucceed,
    SprintPaused,
    SprintResumed,
    SprintComplete,
    SprintError,
}

impl SprintEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SprintEvent::PhaseChanged { .. } => EventKind::PhaseChange,
            SprintEvent::IssueFailed { .. } => EventKind::IssueFail,
            SprintEvent::IssueSucceeded { .. } => EventKind::IssueSucceed,
            SprintEvent::SprintPaused { .. } => EventKind::SprintPaused,
            SprintEvent::SprintResumed { .. } => EventKind::SprintResumed,
            SprintEvent::SprintComplete { .. } => EventKind::SprintComplete,
            SprintEvent::SprintError { .. } => EventKind::SprintError,
        }
    }
}

type Handler = Arc<dyn Fn(&SprintEvent) + Send + Sync>;

/// Synchronous observer dispatcher keyed by event kind.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Handlers for a kind run in
    /// registration order.
    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&SprintEvent) + Send + Sync + 'static) {
        self.subscribe_arc(kind, Arc::new(handler));
    }

    /// Register one shared handler for several kinds.
    pub fn subscribe_many(
        &self,
        kinds: &[EventKind],
        handler: impl Fn(&SprintEvent) + Send + Sync + 'static,
    ) {
        let handler: Handler = Arc::new(handler);
        for kind in kinds {
            self.subscribe_arc(*kind, handler.clone());
        }
    }

    fn subscribe_arc(&self, kind: EventKind, handler: Handler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Invoke every handler registered for the event's kind, in order.
    pub fn emit(&self, event: SprintEvent) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap();
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };

        let depth = EMIT_DEPTH.get();
        if depth >= MAX_EMIT_DEPTH {
            warn!(?event, depth, "dropping re-entrant event beyond depth limit");
            return;
        }

        EMIT_DEPTH.set(depth + 1);
        for handler in &snapshot {
            handler(&event);
        }
        EMIT_DEPTH.set(depth);
    }
}
