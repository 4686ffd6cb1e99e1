mod normalize;
mod select;

pub use normalize::normalize;
pub use select::{count, select_latest};

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::core::time::DateTime;

/// One upstream record as delivered, before normalization.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Canonical outage record. Identity is the upstream `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub reference: String,
    pub affected_customers: u64,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub start_time: Option<DateTime>,
    pub estimated_restoration: Option<DateTime>,
    pub nature: Option<String>,
}

#[cfg(test)]
impl Event {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            affected_customers: 0,
            status: None,
            reason: None,
            start_time: None,
            estimated_restoration: None,
            nature: None,
        }
    }
}

/// Events of one fetch cycle keyed by reference. Inserting an event with a known
/// reference replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSet {
    events: BTreeMap<String, Event>,
}

impl EventSet {
    pub fn insert(&mut self, event: Event) -> Option<Event> {
        self.events.insert(event.reference.clone(), event)
    }

    pub fn get(&self, reference: &str) -> Option<&Event> {
        self.events.get(reference)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.events.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Events in ascending reference order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }
}

impl FromIterator<Event> for EventSet {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let mut set = EventSet::default();
        for event in iter {
            set.insert(event);
        }
        set
    }
}

impl<'a> IntoIterator for &'a EventSet {
    type Item = &'a Event;
    type IntoIter = std::collections::btree_map::Values<'a, String, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.values()
    }
}

impl Serialize for EventSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.events.values())
    }
}

/// Complete state of one successful poll. Never mutated after creation; a new poll
/// produces a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub postcode: String,
    pub count: usize,
    pub latest: Option<Event>,
    pub events: EventSet,
}

impl Snapshot {
    pub fn new(postcode: impl Into<String>, events: EventSet) -> Self {
        Self {
            postcode: postcode.into(),
            count: count(&events),
            latest: select_latest(&events).cloned(),
            events,
        }
    }

    /// Outages that appeared or disappeared compared to `previous`. Without a previous
    /// snapshot every event counts as new.
    pub fn diff(&self, previous: Option<&Snapshot>) -> Delta {
        let Some(previous) = previous else {
            return Delta {
                new: self.events.iter().cloned().collect(),
                resolved: vec![],
            };
        };

        let new = self
            .events
            .iter()
            .filter(|event| !previous.events.contains(&event.reference))
            .cloned()
            .collect();

        let resolved = previous
            .events
            .iter()
            .filter(|event| !self.events.contains(&event.reference))
            .cloned()
            .collect();

        Delta { new, resolved }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub new: Vec<Event>,
    /// Last known values of outages no longer reported by upstream
    pub resolved: Vec<Event>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.resolved.is_empty()
    }
}
