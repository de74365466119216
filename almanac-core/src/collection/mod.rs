//! The event collection: masters, overrides and range queries.

mod storage;
mod vdir;

pub use storage::{ItemKey, MemoryStorage, Storage};
pub use vdir::VdirStorage;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::date_range::DateRange;
use crate::error::{AlmanacError, AlmanacResult};
use crate::event::{CalendarItem, Event, EventTime};
use crate::ics::{parse_event, parse_events};
use crate::locale::Locale;
use crate::localize::localize;
use crate::occurrence::{Occurrence, Occurrences};
use crate::recurrence::{OverrideMap, Series};

/// How [`EventCollection::import`] decides which items to apply.
pub enum ImportMode<'a> {
    /// Apply every accepted item
    Batch,
    /// Ask the callback for each change; items it declines are skipped
    Interactive(&'a mut dyn FnMut(&Event) -> bool),
}

/// What an import did.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    /// Masters removed because the import cancelled them
    pub cancelled: usize,
    /// Items identical to what is already stored
    pub unchanged: usize,
    pub declined: usize,
    /// Items older than the stored version ([`AlmanacError::ImportConflict`])
    pub stale: Vec<AlmanacError>,
    /// Items that could not be parsed ([`AlmanacError::MalformedItem`])
    pub rejected: Vec<AlmanacError>,
}

impl ImportSummary {
    pub fn applied(&self) -> usize {
        self.added + self.updated + self.cancelled
    }
}

/// What importing one item would do.
enum Change {
    Add,
    Update(Event),
    Cancel(Event),
    Unchanged,
    Stale { stored: i64 },
}

struct Master {
    event: Event,
    series: AlmanacResult<Series>,
}

/// Calendar items indexed for range queries, persisted through a [`Storage`].
pub struct EventCollection<S: Storage> {
    storage: S,
    locale: Locale,
    masters: BTreeMap<String, Master>,
    overrides: HashMap<String, OverrideMap>,
}

impl<S: Storage> EventCollection<S> {
    /// Build the index from everything `storage` holds.
    ///
    /// Stored items that cannot be read are skipped with a warning.
    pub fn open(storage: S, locale: Locale) -> AlmanacResult<Self> {
        let mut collection = EventCollection {
            storage,
            locale,
            masters: BTreeMap::new(),
            overrides: HashMap::new(),
        };

        for item in collection.storage.fetch_all()? {
            match item {
                Ok(event) => collection.index(CalendarItem::from(event)),
                Err(e) => warn!(error = %e, "Skipping unreadable stored item"),
            }
        }

        debug!(items = collection.len(), "Opened collection");
        Ok(collection)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Parse a single item for `calendar` without storing it.
    pub fn new_event(&self, text: &str, calendar: &str) -> AlmanacResult<Event> {
        parse_event(text, calendar)
    }

    /// Store and index a new event.
    ///
    /// Fails with [`AlmanacError::DuplicateUid`] for a master whose UID is
    /// already taken. Overrides replace any override at the same recurrence id.
    pub fn new(&mut self, event: Event) -> AlmanacResult<()> {
        let item = CalendarItem::from(event);
        if let CalendarItem::Master(event) = &item {
            if self.masters.contains_key(&event.uid) {
                return Err(AlmanacError::DuplicateUid(event.uid.clone()));
            }
        }

        if let Some(previous) = self.stored(&item).cloned() {
            self.discard_moved(&previous, item.event())?;
        }
        self.storage.store(item.event())?;
        self.index(item);
        Ok(())
    }

    /// Merge iCalendar text into the collection.
    ///
    /// Items older than what is stored (by SEQUENCE) are ignored and reported
    /// in the summary. A cancelled master is removed together with its stored
    /// file; cancelled overrides are kept and hide their occurrence.
    pub fn import(
        &mut self,
        text: &str,
        calendar: &str,
        mut mode: ImportMode<'_>,
    ) -> AlmanacResult<ImportSummary> {
        let mut summary = ImportSummary::default();

        for parsed in parse_events(text, calendar)? {
            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Rejecting malformed item");
                    summary.rejected.push(e);
                    continue;
                }
            };
            let item = CalendarItem::from(event);

            let change = self.classify(&item);
            match change {
                Change::Unchanged => {
                    debug!(uid = %item.event().uid, "Item unchanged");
                    summary.unchanged += 1;
                    continue;
                }
                Change::Stale { stored } => {
                    let event = item.event();
                    debug!(uid = %event.uid, stored, incoming = event.sequence, "Ignoring stale item");
                    summary.stale.push(AlmanacError::ImportConflict {
                        uid: event.uid.clone(),
                        stored,
                        incoming: event.sequence,
                    });
                    continue;
                }
                _ => {}
            }

            if let ImportMode::Interactive(confirm) = &mut mode {
                if !confirm(item.event()) {
                    debug!(uid = %item.event().uid, "Import declined");
                    summary.declined += 1;
                    continue;
                }
            }

            match change {
                Change::Add => {
                    debug!(uid = %item.event().uid, "Adding item");
                    self.storage.store(item.event())?;
                    self.index(item);
                    summary.added += 1;
                }
                Change::Update(previous) => {
                    debug!(uid = %item.event().uid, "Updating item");
                    self.discard_moved(&previous, item.event())?;
                    self.storage.store(item.event())?;
                    self.index(item);
                    summary.updated += 1;
                }
                Change::Cancel(previous) => {
                    debug!(uid = %previous.uid, "Cancelling master");
                    self.storage.delete(&ItemKey::of(&previous))?;
                    self.masters.remove(&previous.uid);
                    summary.cancelled += 1;
                }
                Change::Unchanged | Change::Stale { .. } => {}
            }
        }

        Ok(summary)
    }

    /// Occurrences intersecting `[start, end)`, ordered by local start then UID.
    ///
    /// Series whose recurrence cannot be expanded are skipped with a warning.
    pub fn get_localized(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> AlmanacResult<Occurrences<'_>> {
        let window = DateRange::new(start, end)?;

        let mut sources: Vec<Box<dyn Iterator<Item = Occurrence> + '_>> = Vec::new();
        for (uid, master) in &self.masters {
            if master.event.is_cancelled() {
                continue;
            }
            match &master.series {
                Ok(series) => sources.push(Box::new(series.expand(
                    &master.event,
                    self.overrides.get(uid),
                    window,
                ))),
                Err(e) => warn!(uid = %uid, error = %e, "Skipping series"),
            }
        }

        Ok(Occurrences::merge(sources))
    }

    /// Remove the master (`recurrence_id` of `None`) or one override.
    ///
    /// Returns the removed event, or `None` if nothing was stored under that key.
    pub fn delete(
        &mut self,
        uid: &str,
        recurrence_id: Option<&EventTime>,
    ) -> AlmanacResult<Option<Event>> {
        let removed = match recurrence_id {
            None => self.masters.remove(uid).map(|master| master.event),
            Some(rid) => {
                let key = self.override_key(rid);
                let removed = self
                    .overrides
                    .get_mut(uid)
                    .and_then(|overrides| overrides.remove(&key));
                if self.overrides.get(uid).is_some_and(|o| o.is_empty()) {
                    self.overrides.remove(uid);
                }
                removed
            }
        };

        if let Some(event) = &removed {
            debug!(uid = %uid, "Deleting item");
            self.storage.delete(&ItemKey::of(event))?;
        }
        Ok(removed)
    }

    pub fn master(&self, uid: &str) -> Option<&Event> {
        self.masters.get(uid).map(|master| &master.event)
    }

    /// Overrides stored for `uid`, ordered by recurrence id.
    pub fn overrides_of(&self, uid: &str) -> impl Iterator<Item = &Event> {
        self.overrides.get(uid).into_iter().flat_map(|o| o.values())
    }

    /// Number of stored items (masters and overrides).
    pub fn len(&self) -> usize {
        self.masters.len() + self.overrides.values().map(|o| o.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn override_key(&self, recurrence_id: &EventTime) -> DateTime<Utc> {
        localize(recurrence_id, self.locale.timezone)
            .local
            .with_timezone(&Utc)
    }

    /// The stored counterpart of `item`, if any.
    fn stored(&self, item: &CalendarItem) -> Option<&Event> {
        match item {
            CalendarItem::Master(event) => self.master(&event.uid),
            CalendarItem::Override {
                recurrence_id,
                event,
            } => self
                .overrides
                .get(&event.uid)?
                .get(&self.override_key(recurrence_id)),
        }
    }

    fn classify(&self, item: &CalendarItem) -> Change {
        let incoming = item.event();
        let Some(stored) = self.stored(item) else {
            // Nothing to cancel
            if matches!(item, CalendarItem::Master(_)) && incoming.is_cancelled() {
                return Change::Unchanged;
            }
            return Change::Add;
        };

        if stored == incoming {
            return Change::Unchanged;
        }
        if incoming.sequence < stored.sequence {
            return Change::Stale {
                stored: stored.sequence,
            };
        }
        match item {
            CalendarItem::Master(event) if event.is_cancelled() => Change::Cancel(stored.clone()),
            _ => Change::Update(stored.clone()),
        }
    }

    /// Remove the stored copy of `previous` when `next` will be stored under a
    /// different key (another calendar, or a recurrence id written differently).
    fn discard_moved(&mut self, previous: &Event, next: &Event) -> AlmanacResult<()> {
        let old = ItemKey::of(previous);
        if old != ItemKey::of(next) {
            self.storage.delete(&old)?;
        }
        Ok(())
    }

    /// Add `item` to the index, replacing what was there.
    fn index(&mut self, item: CalendarItem) {
        match item {
            CalendarItem::Master(event) => {
                let series = Series::compile(&event, self.locale.timezone);
                if let Err(e) = &series {
                    warn!(uid = %event.uid, error = %e, "Series will be skipped");
                }
                self.masters
                    .insert(event.uid.clone(), Master { event, series });
            }
            CalendarItem::Override {
                recurrence_id,
                event,
            } => {
                let key = self.override_key(&recurrence_id);
                self.overrides
                    .entry(event.uid.clone())
                    .or_default()
                    .insert(key, event);
            }
        }
    }
}
