use std::path::Path;

use almanac_core::collection::{EventCollection, ImportMode};
use almanac_core::config::AlmanacConfig;
use almanac_core::event::Event;
use anyhow::Result;
use dialoguer::Confirm;
use owo_colors::OwoColorize;

pub fn run(config: &AlmanacConfig, file: &Path, calendar: &str, batch: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)?;
    let mut collection = EventCollection::open(config.storage(), config.locale.clone())?;

    let mut prompt_error = None;
    let mut confirm = |event: &Event| {
        let prompt = match &event.recurrence_id {
            Some(_) => format!("Import changed occurrence \"{}\" ({})?", event, event.start),
            None => format!("Import \"{}\" ({})?", event, event.start),
        };
        match Confirm::new().with_prompt(prompt).default(true).interact() {
            Ok(answer) => answer,
            Err(e) => {
                prompt_error.get_or_insert(e);
                false
            }
        }
    };

    let mode = if batch {
        ImportMode::Batch
    } else {
        ImportMode::Interactive(&mut confirm)
    };
    let summary = collection.import(&text, calendar, mode)?;

    if let Some(e) = prompt_error {
        return Err(e.into());
    }

    for conflict in &summary.stale {
        println!("   {}", conflict.to_string().yellow());
    }
    for rejected in &summary.rejected {
        println!("   {}", rejected.to_string().red());
    }

    if summary.applied() == 0 {
        println!("{}", "Nothing imported".dimmed());
        return Ok(());
    }

    println!(
        "Imported into {}: {} added, {} updated, {} cancelled",
        calendar.bold(),
        summary.added.green(),
        summary.updated.blue(),
        summary.cancelled.red()
    );
    if summary.unchanged > 0 {
        println!("{}", format!("{} unchanged", summary.unchanged).dimmed());
    }

    Ok(())
}
