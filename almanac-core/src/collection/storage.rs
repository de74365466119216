//! Storage collaborator for the event collection.

use std::collections::HashMap;

use tracing::debug;

use crate::error::AlmanacResult;
use crate::event::{Event, EventTime};
use crate::ics::{generate_ics, parse_event};

/// Identifies one stored calendar item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub calendar: String,
    pub uid: String,
    /// Set for overrides, as written in the item
    pub recurrence_id: Option<EventTime>,
}

impl ItemKey {
    pub fn of(event: &Event) -> Self {
        ItemKey {
            calendar: event.calendar.clone(),
            uid: event.uid.clone(),
            recurrence_id: event.recurrence_id.clone(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.calendar == event.calendar
            && self.uid == event.uid
            && self.recurrence_id == event.recurrence_id
    }
}

/// A key-value store of calendar items.
///
/// `store` replaces any item already stored under the event's key.
pub trait Storage {
    fn store(&mut self, event: &Event) -> AlmanacResult<()>;

    /// Every stored item. Items that cannot be read are returned as errors so
    /// the caller can decide whether to skip them.
    fn fetch_all(&self) -> AlmanacResult<Vec<AlmanacResult<Event>>>;

    fn fetch_by_uid(&self, uid: &str) -> AlmanacResult<Vec<Event>> {
        Ok(self
            .fetch_all()?
            .into_iter()
            .filter_map(Result::ok)
            .filter(|event| event.uid == uid)
            .collect())
    }

    /// Remove the item stored under `key`. Removing a missing item is not an error.
    fn delete(&mut self, key: &ItemKey) -> AlmanacResult<()>;
}

/// Keeps items as serialized iCalendar text in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: HashMap<ItemKey, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn store(&mut self, event: &Event) -> AlmanacResult<()> {
        let ics = generate_ics(std::slice::from_ref(event))?;
        debug!(uid = %event.uid, calendar = %event.calendar, "Storing item in memory");
        self.items.insert(ItemKey::of(event), ics);
        Ok(())
    }

    fn fetch_all(&self) -> AlmanacResult<Vec<AlmanacResult<Event>>> {
        Ok(self
            .items
            .iter()
            .map(|(key, ics)| parse_event(ics, &key.calendar))
            .collect())
    }

    fn delete(&mut self, key: &ItemKey) -> AlmanacResult<()> {
        self.items.remove(key);
        Ok(())
    }
}
