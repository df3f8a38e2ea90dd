// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`EventBuffer`] (§3 "In-memory EventBuffer"): the tail of the
//! persisted log plus any event generated since the last flush that the
//! `Store` hasn't seen yet. Adjacent `agent_message` entries sharing a
//! `seq` coalesce into one logical entry, matching the wire behavior
//! observers see.

use std::collections::VecDeque;

use crate::event::{Event, EventKind};

/// Bounded deque of the most recent events, persisted or not.
pub struct EventBuffer {
    capacity: usize,
    events: VecDeque<Event>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: VecDeque::with_capacity(capacity) }
    }

    /// Append one event, coalescing into the previous entry when both are
    /// `agent_message` events sharing a `seq` (§4.4 coalescing).
    pub fn push(&mut self, event: Event) {
        if let (EventKind::AgentMessage { html: new_html }, Some(last)) =
            (&event.kind, self.events.back_mut())
        {
            if let EventKind::AgentMessage { html: last_html } = &mut last.kind {
                if last.seq == event.seq {
                    last_html.push_str(new_html);
                    return;
                }
            }
        }
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// Events with `seq > after_seq`, in order.
    pub fn events_after(&self, after_seq: u64) -> Vec<Event> {
        self.events.iter().filter(|e| e.seq > after_seq).cloned().collect()
    }

    pub fn max_seq(&self) -> Option<u64> {
        self.events.back().map(|e| e.seq)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drop buffered entries once the store has durably persisted
    /// everything up to `persisted_seq` — they're retrievable from disk
    /// from now on, so keeping them in memory only wastes space.
    pub fn drop_persisted(&mut self, persisted_seq: u64) {
        while let Some(front) = self.events.front() {
            if front.seq <= persisted_seq {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "event_buffer_tests.rs"]
mod tests;
