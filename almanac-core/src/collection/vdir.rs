//! Directory-backed storage: one directory per calendar, `.ics` files inside.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::collection::storage::{ItemKey, Storage};
use crate::error::{AlmanacError, AlmanacResult};
use crate::event::{Event, EventTime};
use crate::ics::{generate_ics, parse_events};

/// A set of vdir calendars, keyed by calendar name.
///
/// New items get a file of their own. Files holding several items (a master
/// together with its overrides, as other clients write them) are read as a
/// whole and rewritten when one of their items changes.
#[derive(Debug, Clone)]
pub struct VdirStorage {
    calendars: BTreeMap<String, PathBuf>,
}

/// An `.ics` file and the items it holds.
struct IcsFile {
    path: PathBuf,
    events: Vec<Event>,
}

impl VdirStorage {
    pub fn new<I, N, P>(calendars: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<PathBuf>,
    {
        VdirStorage {
            calendars: calendars
                .into_iter()
                .map(|(name, path)| (name.into(), path.into()))
                .collect(),
        }
    }

    pub fn calendars(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.calendars
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    fn path_for(&self, calendar: &str) -> AlmanacResult<&Path> {
        self.calendars
            .get(calendar)
            .map(PathBuf::as_path)
            .ok_or_else(|| AlmanacError::Storage(format!("Unknown calendar '{}'", calendar)))
    }

    fn ics_paths(dir: &Path) -> AlmanacResult<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "ics"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// The file holding the item stored under `key`, if any.
    fn find(&self, key: &ItemKey) -> AlmanacResult<Option<IcsFile>> {
        let dir = self.path_for(&key.calendar)?;

        for path in Self::ics_paths(dir)? {
            let content = std::fs::read_to_string(&path)?;
            let items = match parse_events(&content, &key.calendar) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            let events: Vec<Event> = items.into_iter().filter_map(Result::ok).collect();
            if events.iter().any(|event| key.matches(event)) {
                return Ok(Some(IcsFile { path, events }));
            }
        }

        Ok(None)
    }

    fn write(path: &Path, events: &[Event]) -> AlmanacResult<()> {
        let content = generate_ics(events)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Pick a file name for a new item that doesn't collide with existing files.
    fn unique_slug_for(event: &Event, dir: &Path) -> AlmanacResult<String> {
        let base = Self::base_slug_for(event);

        if !dir.join(format!("{}.ics", base)).exists() {
            return Ok(base);
        }

        for n in 2..=100 {
            let suffixed = format!("{}-{}", base, n);
            if !dir.join(format!("{}.ics", suffixed)).exists() {
                return Ok(suffixed);
            }
        }

        Err(AlmanacError::Storage(format!(
            "Too many file name collisions for '{}'",
            base
        )))
    }

    /// Timed events: `YYYY-MM-DDTHHMM__slug`
    /// All-day events: `YYYY-MM-DD__slug`
    /// Recurring events: `_recurring__slug`
    fn base_slug_for(event: &Event) -> String {
        let mut slug = slug::slugify(&event.summary);
        if slug.is_empty() {
            slug = "event".to_string();
        }

        if event.is_recurring() {
            return format!("_recurring__{}", slug);
        }

        let date = match &event.start {
            EventTime::Date(d) => d.format("%Y-%m-%d").to_string(),
            EventTime::DateTimeUtc(dt) => dt.format("%Y-%m-%dT%H%M").to_string(),
            EventTime::DateTimeFloating(dt) => dt.format("%Y-%m-%dT%H%M").to_string(),
            EventTime::DateTimeZoned { datetime, .. } => {
                datetime.format("%Y-%m-%dT%H%M").to_string()
            }
        };

        format!("{}__{}", date, slug)
    }
}

impl Storage for VdirStorage {
    fn store(&mut self, event: &Event) -> AlmanacResult<()> {
        let key = ItemKey::of(event);

        if let Some(mut file) = self.find(&key)? {
            for stored in file.events.iter_mut().filter(|e| key.matches(e)) {
                *stored = event.clone();
            }
            debug!(uid = %event.uid, path = %file.path.display(), "Rewriting item");
            return Self::write(&file.path, &file.events);
        }

        let dir = self.path_for(&event.calendar)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.ics", Self::unique_slug_for(event, dir)?));
        debug!(uid = %event.uid, path = %path.display(), "Writing new item");
        Self::write(&path, std::slice::from_ref(event))
    }

    fn fetch_all(&self) -> AlmanacResult<Vec<AlmanacResult<Event>>> {
        let mut items = Vec::new();

        for (calendar, dir) in &self.calendars {
            for path in Self::ics_paths(dir)? {
                let content = std::fs::read_to_string(&path)?;
                match parse_events(&content, calendar) {
                    Ok(parsed) => items.extend(parsed.into_iter().map(|item| {
                        item.map_err(|e| {
                            AlmanacError::MalformedItem(format!("{}: {}", path.display(), e))
                        })
                    })),
                    Err(e) => items.push(Err(AlmanacError::MalformedItem(format!(
                        "{}: {}",
                        path.display(),
                        e
                    )))),
                }
            }
        }

        Ok(items)
    }

    fn delete(&mut self, key: &ItemKey) -> AlmanacResult<()> {
        let Some(file) = self.find(key)? else {
            return Ok(());
        };

        let remaining: Vec<Event> = file
            .events
            .into_iter()
            .filter(|event| !key.matches(event))
            .collect();

        if remaining.is_empty() {
            debug!(uid = %key.uid, path = %file.path.display(), "Removing file");
            std::fs::remove_file(&file.path)?;
        } else {
            debug!(uid = %key.uid, path = %file.path.display(), "Rewriting shared file");
            Self::write(&file.path, &remaining)?;
        }

        Ok(())
    }
}
