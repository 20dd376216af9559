//! Enter/update/exit partitioning of rendered events, keyed by `EventId`.

use std::collections::HashSet;

use serde::Serialize;

use crate::event::{EventId, EventRecord};

/// Display attribute handed to the renderer alongside each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    /// Category is in the current selection.
    Selected,
    /// Category is deselected; still drawn, de-emphasized.
    Dimmed,
}

/// One drawn record. Selection styling and mask highlighting are independent:
/// a masked record still reports whether its category is selected.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedEvent {
    pub record: EventRecord,
    pub style: Style,
    /// Kept by the active mask.
    pub highlighted: bool,
}

impl RenderedEvent {
    pub fn id(&self) -> EventId {
        self.record.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Diff {
    pub enter: Vec<RenderedEvent>,
    pub update: Vec<RenderedEvent>,
    pub exit: Vec<RenderedEvent>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.enter.is_empty() && self.update.is_empty() && self.exit.is_empty()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.enter.len(), self.update.len(), self.exit.len())
    }

    pub fn enter_ids(&self) -> HashSet<EventId> {
        self.enter.iter().map(RenderedEvent::id).collect()
    }

    pub fn update_ids(&self) -> HashSet<EventId> {
        self.update.iter().map(RenderedEvent::id).collect()
    }

    pub fn exit_ids(&self) -> HashSet<EventId> {
        self.exit.iter().map(RenderedEvent::id).collect()
    }
}

/// Keep the first occurrence of each ID, preserving order.
pub fn dedup_by_id(events: Vec<RenderedEvent>) -> Vec<RenderedEvent> {
    let mut seen = HashSet::with_capacity(events.len());
    events.into_iter().filter(|e| seen.insert(e.id())).collect()
}

/// Partition `previous` and `next` by identity.
///
/// `update` holds every record present in both, even when nothing but the
/// style changed, so an unchanged `next` yields `update == next` and empty
/// `enter`/`exit`. Both inputs are expected to be free of duplicate IDs.
pub fn compute_diff(previous: &[RenderedEvent], next: &[RenderedEvent]) -> Diff {
    let prev_ids: HashSet<EventId> = previous.iter().map(RenderedEvent::id).collect();
    let next_ids: HashSet<EventId> = next.iter().map(RenderedEvent::id).collect();

    let (update, enter): (Vec<_>, Vec<_>) = next
        .iter()
        .cloned()
        .partition(|e| prev_ids.contains(&e.id()));
    let exit = previous
        .iter()
        .filter(|e| !next_ids.contains(&e.id()))
        .cloned()
        .collect();

    Diff {
        enter,
        update,
        exit,
    }
}
