use almanac_core::agenda::ListFormatter;
use almanac_core::clock::SystemClock;
use almanac_core::collection::EventCollection;
use almanac_core::config::AlmanacConfig;
use almanac_core::date_range::DateRange;
use anyhow::Result;

pub fn run(
    config: &AlmanacConfig,
    range: &[String],
    format: Option<String>,
    day_format: Option<String>,
    calendar: Option<String>,
) -> Result<()> {
    let locale = &config.locale;
    let clock = SystemClock;

    let range = DateRange::resolve(range, locale, Some(&config.default.timedelta), &clock)?;
    let collection = EventCollection::open(config.storage(), locale.clone())?;

    let occurrences = collection
        .get_localized(range.start, range.end)?
        .filter(|o| calendar.as_ref().is_none_or(|c| &o.calendar == c));

    let formatter = config
        .calendars
        .iter()
        .filter_map(|(name, cal)| cal.color.as_deref().map(|color| (name, color)))
        .fold(ListFormatter::new(locale, &clock), |f, (name, color)| {
            f.with_calendar_color(name, color)
        });

    let format = format.unwrap_or_else(|| config.view.event_format.clone());
    let day_format = day_format.unwrap_or_else(|| config.view.day_format.clone());

    for line in formatter.render(occurrences, &format, &day_format) {
        println!("{}", line);
    }

    Ok(())
}
