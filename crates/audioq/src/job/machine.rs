//! Transition table of the job item state machine.
//!
//! Planning a transition has no side effects, it only answers whether an event is allowed
//! for an item and which status the item ends up in.
use thiserror::Error;

use crate::job::item::{ItemStatus, JobItem, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Queue,
    Work,
    Finish,
    Cancel,
    Retry,
}

impl From<Transition> for Event {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Queue => Event::Queue,
            Transition::Cancel => Event::Cancel,
            Transition::Finish => Event::Finish,
            Transition::Retry => Event::Retry,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("Cannot {event:?} item {item} in state {from:?}")]
    IllegalTransition {
        item: u64,
        event: Event,
        from: ItemStatus,
    },
    #[error("Cannot {event:?} item {item}: {reason}")]
    GuardRefused {
        item: u64,
        event: Event,
        reason: &'static str,
    },
}

type Guard = fn(&JobItem) -> Option<&'static str>;

struct Rule {
    event: Event,
    from: &'static [ItemStatus],
    to: ItemStatus,
    guard: Option<Guard>,
}

fn refuse_pending_cancel(item: &JobItem) -> Option<&'static str> {
    (item.transition == Some(Transition::Cancel)).then_some("a cancellation is pending")
}

static RULES: [Rule; 5] = [
    Rule {
        event: Event::Queue,
        from: &[ItemStatus::New],
        to: ItemStatus::Queued,
        guard: Some(refuse_pending_cancel),
    },
    Rule {
        event: Event::Work,
        from: &[ItemStatus::Queued],
        to: ItemStatus::Working,
        guard: None,
    },
    Rule {
        event: Event::Finish,
        from: &[ItemStatus::Queued, ItemStatus::Working, ItemStatus::Finished],
        to: ItemStatus::Finished,
        guard: None,
    },
    Rule {
        event: Event::Cancel,
        from: &[ItemStatus::New, ItemStatus::Queued, ItemStatus::Working],
        to: ItemStatus::Finished,
        guard: None,
    },
    Rule {
        event: Event::Retry,
        from: &[ItemStatus::Finished],
        to: ItemStatus::Queued,
        guard: None,
    },
];

fn rule(event: Event) -> &'static Rule {
    // Every event has exactly one rule
    let index = match event {
        Event::Queue => 0,
        Event::Work => 1,
        Event::Finish => 2,
        Event::Cancel => 3,
        Event::Retry => 4,
    };
    let rule = &RULES[index];
    debug_assert_eq!(rule.event, event);
    rule
}

/// Returns the status that `item` reaches through `event`.
pub fn plan(item: &JobItem, event: Event) -> Result<ItemStatus, MachineError> {
    let rule = rule(event);
    if !rule.from.contains(&item.status) {
        return Err(MachineError::IllegalTransition {
            item: item.id.as_num(),
            event,
            from: item.status,
        });
    }
    if let Some(reason) = rule.guard.and_then(|guard| guard(item)) {
        return Err(MachineError::GuardRefused {
            item: item.id.as_num(),
            event,
            reason,
        });
    }
    Ok(rule.to)
}

/// Whether `transition` may be written as the marker of `item`.
///
/// The marker must make sense for the current status. A new marker replaces the pending
/// one, except for a pending cancellation which only another cancellation replaces.
pub fn can_mark(item: &JobItem, transition: Transition) -> bool {
    if !rule(transition.into()).from.contains(&item.status) {
        return false;
    }
    item.transition != Some(Transition::Cancel) || transition == Transition::Cancel
}
