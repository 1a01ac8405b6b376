use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::calendar::{
    self, CalendarDirectory, CalendarError, CalendarService, Event, EventDateTime, TimeWindow,
};
use crate::config::Config;
use crate::extract::{self, Fixture};
use crate::fetch;

const EVENT_DURATION_SECS: i64 = 9000;
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
#[error("sync failed for calendar {calendar_id}, event {event_ref}: {source}")]
pub struct SyncError {
    pub calendar_id: String,
    pub event_ref: String,
    #[source]
    pub source: CalendarError,
}

// Applies create/update/delete operations so a team's calendar reflects its
// fixture list. Matching against the service goes through the "home vs away"
// summary plus a same-day window; the service is not searchable by the
// detail-link identity used internally. Nothing here retries: a failure
// propagates and the caller decides whether to redo the whole team sync.
pub struct SyncEngine<'a, S: CalendarService> {
    service: &'a S,
    time_zone: String,
}

impl<'a, S: CalendarService> SyncEngine<'a, S> {
    pub fn new(service: &'a S, time_zone: &str) -> SyncEngine<'a, S> {
        SyncEngine {
            service,
            time_zone: time_zone.to_string(),
        }
    }

    pub async fn apply_fixtures(
        &self,
        calendar_id: &str,
        fixtures: &[Fixture],
    ) -> Result<(), SyncError> {
        for fixture in fixtures {
            self.apply_fixture(calendar_id, fixture).await?;
        }
        Ok(())
    }

    async fn apply_fixture(&self, calendar_id: &str, fixture: &Fixture) -> Result<(), SyncError> {
        let summary = fixture.summary();
        let description = event_description(fixture);
        let start = fixture.start();

        let window = day_window(start);
        let candidates = self
            .service
            .list_events(calendar_id, Some(&window), Some(&summary))
            .await
            .map_err(|e| self.error(calendar_id, &summary, e))?;

        // The window is padded for zone offsets, so pin the match back to
        // the fixture's own day.
        let existing = candidates.into_iter().find(|e| {
            e.summary == summary
                && parse_event_start(&e.start).is_some_and(|s| s.date() == fixture.date)
        });

        let Some(existing) = existing else {
            let event = Event {
                id: String::new(),
                summary: summary.clone(),
                description: Some(description),
                location: fixture.location.clone(),
                start: self.event_time(start),
                end: self.event_time(start + Duration::seconds(EVENT_DURATION_SECS)),
                visibility: Some("public".to_string()),
            };
            self.service
                .insert_event(calendar_id, &event)
                .await
                .map_err(|e| self.error(calendar_id, &summary, e))?;
            println!("Added event: {summary}");
            return Ok(());
        };

        if existing.description.as_deref() == Some(description.as_str()) {
            println!("Event already exists with the same description: {summary}");
            return Ok(());
        }

        // A rescrape without a result never overwrites whatever the event
        // already records.
        if fixture.result.is_none() {
            println!("Leaving event untouched (no result to record): {summary}");
            return Ok(());
        }

        // Patch the description only; start, end and location stay as the
        // service has them.
        let patched = Event {
            description: Some(description),
            ..existing.clone()
        };
        self.service
            .update_event(calendar_id, &existing.id, &patched)
            .await
            .map_err(|e| self.error(calendar_id, &existing.id, e))?;
        println!("Updated the event description for: {summary}");

        Ok(())
    }

    // Removes future events that no longer line up with any open fixture
    // sharing their summary. Fixtures that already carry a result are out of
    // consideration entirely, which protects their events; so are events
    // whose summary matches no current fixture.
    pub async fn prune_stale(
        &self,
        calendar_id: &str,
        fixtures: &[Fixture],
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let window = TimeWindow {
            time_min: now.to_rfc3339(),
            time_max: None,
        };
        let events = self
            .service
            .list_events(calendar_id, Some(&window), None)
            .await
            .map_err(|e| self.error(calendar_id, "<staleness scan>", e))?;

        let mut open_starts: HashMap<String, Vec<NaiveDateTime>> = HashMap::new();
        for fixture in fixtures {
            // A fixture without a well-formed two-team summary never makes
            // an event eligible for removal.
            if fixture.result.is_some() || fixture.home.is_empty() || fixture.away.is_empty() {
                continue;
            }
            open_starts
                .entry(fixture.summary())
                .or_default()
                .push(fixture.start());
        }

        let mut removed = 0;
        for event in events {
            let Some(starts) = open_starts.get(&event.summary) else {
                continue;
            };
            let Some(event_start) = parse_event_start(&event.start) else {
                continue;
            };
            if starts.contains(&event_start) {
                continue;
            }

            self.service
                .delete_event(calendar_id, &event.id)
                .await
                .map_err(|e| self.error(calendar_id, &event.id, e))?;
            println!("Removed stale event: {}", event.summary);
            removed += 1;
        }

        if removed == 0 {
            println!("No stale events to remove");
        }

        Ok(())
    }

    fn event_time(&self, at: NaiveDateTime) -> EventDateTime {
        EventDateTime {
            date_time: at.format(DATE_TIME_FORMAT).to_string(),
            time_zone: Some(self.time_zone.clone()),
        }
    }

    fn error(&self, calendar_id: &str, event_ref: &str, source: CalendarError) -> SyncError {
        SyncError {
            calendar_id: calendar_id.to_string(),
            event_ref: event_ref.to_string(),
            source,
        }
    }
}

// Full on-demand sync for one team: scrape, resolve the calendar, share,
// reconcile, prune. Assumes at most one concurrent sync per team; callers
// must coalesce.
pub async fn sync_team<S: CalendarService>(
    config: &Config,
    service: &S,
    team_input: &str,
) -> Result<String> {
    let url = fetch::normalize_team_url(team_input, &config.base_url);
    let client = fetch::build_client()?;

    let html = fetch::fetch_page(&client, &url).await?;
    let data = extract::extract_team_data(&html, &url, true)?;
    if data.team_name.is_empty() {
        anyhow::bail!("no team at {url}");
    }

    println!("{}", "-".repeat(20));
    println!("Processing team: {}", data.team_name);

    let directory = CalendarDirectory::new(
        Path::new(&config.data_dir).join("calendars.json"),
        &config.time_zone,
    );
    let calendar_id = directory.resolve(service, &url, &data.team_name).await?;

    calendar::share_with_emails(service, &calendar_id, &config.share_emails, "writer").await?;

    let engine = SyncEngine::new(service, &config.time_zone);
    engine.apply_fixtures(&calendar_id, &data.fixtures).await?;
    engine
        .prune_stale(&calendar_id, &data.fixtures, Utc::now())
        .await?;

    println!(
        "Calendar link: https://calendar.google.com/calendar/embed?src={calendar_id}"
    );

    Ok(calendar_id)
}

fn event_description(fixture: &Fixture) -> String {
    let mut description = format!(
        "Competição: {}\n",
        fixture.competition.as_deref().unwrap_or("")
    );
    if let Some(result) = &fixture.result {
        description.push_str(&format!("Resultado: {result}\n"));
    }
    description.push_str(&format!("Link: {}\n", fixture.link));
    description
}

// Window bounds travel as RFC3339 instants with an offset; the service
// rejects offset-less values. Fixture days are wall-clock time in the
// operating zone, so the bounds are padded past the zone's possible UTC
// offsets and matches are pinned back to the day afterwards.
fn day_window(start: NaiveDateTime) -> TimeWindow {
    let day_start = start.date().and_hms_opt(0, 0, 0).unwrap_or(start);
    let min = Utc.from_utc_datetime(&day_start) - Duration::hours(2);
    let max = Utc.from_utc_datetime(&(day_start + Duration::days(1))) + Duration::hours(2);
    TimeWindow {
        time_min: min.to_rfc3339(),
        time_max: Some(max.to_rfc3339()),
    }
}

// Service timestamps may carry an offset suffix; the leading local part is
// what fixture starts are compared against.
fn parse_event_start(start: &EventDateTime) -> Option<NaiveDateTime> {
    let text = &start.date_time;
    let local = if text.len() > 19 { &text[..19] } else { text };
    NaiveDateTime::parse_from_str(local, DATE_TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::testutil::FakeCalendarService;
    use chrono::{NaiveDate, NaiveTime};

    fn fixture(home: &str, away: &str, result: Option<&str>) -> Fixture {
        Fixture {
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            time: NaiveTime::from_hms_opt(15, 0, 0),
            home: home.to_string(),
            away: away.to_string(),
            result: result.map(str::to_string),
            location: Some("Pavilhão Municipal".to_string()),
            competition: Some("Campeonato Distrital".to_string()),
            link: "https://www.fpb.pt/jogo/1".to_string(),
            age_group: "Sub-18".to_string(),
            gender: "Masculinos".to_string(),
            season: "2025-2026".to_string(),
        }
    }

    fn service_with_calendar() -> FakeCalendarService {
        FakeCalendarService::with_calendar("cal-1", "CB Tavira")
    }

    #[tokio::test]
    async fn creates_one_event_for_an_unmatched_fixture() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", None)])
            .await
            .unwrap();

        let events = service.events_of("cal-1");
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.summary, "A vs B");
        assert_eq!(event.start.date_time, "2025-09-01T15:00:00");
        assert_eq!(event.end.date_time, "2025-09-01T17:30:00");
        assert_eq!(event.start.time_zone.as_deref(), Some("Europe/Lisbon"));

        let description = event.description.as_deref().unwrap();
        assert!(description.contains("Campeonato Distrital"));
        assert!(description.contains("https://www.fpb.pt/jogo/1"));
    }

    #[tokio::test]
    async fn identical_description_is_a_no_op() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");
        let fixture = fixture("A", "B", None);

        engine.apply_fixtures("cal-1", &[fixture.clone()]).await.unwrap();
        let before = service.events_of("cal-1");

        engine.apply_fixtures("cal-1", &[fixture]).await.unwrap();
        let after = service.events_of("cal-1");

        assert_eq!(after.len(), 1);
        assert_eq!(after[0].description, before[0].description);
        assert_eq!(after[0].id, before[0].id);
    }

    #[tokio::test]
    async fn resultless_rescrape_never_clobbers_a_differing_description() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");
        let fixture = fixture("A", "B", None);

        // Seed an event whose description differs only by whitespace.
        let seeded = event_description(&fixture) + " ";
        service
            .insert_event(
                "cal-1",
                &Event {
                    summary: "A vs B".to_string(),
                    description: Some(seeded.clone()),
                    start: EventDateTime {
                        date_time: "2025-09-01T15:00:00".to_string(),
                        time_zone: None,
                    },
                    end: EventDateTime {
                        date_time: "2025-09-01T17:30:00".to_string(),
                        time_zone: None,
                    },
                    ..Event::default()
                },
            )
            .await
            .unwrap();

        engine.apply_fixtures("cal-1", &[fixture]).await.unwrap();

        let events = service.events_of("cal-1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description.as_deref(), Some(seeded.as_str()));
    }

    #[tokio::test]
    async fn a_result_updates_the_description_and_nothing_else() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", None)])
            .await
            .unwrap();
        let before = service.events_of("cal-1");

        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", Some("78-65"))])
            .await
            .unwrap();

        let events = service.events_of("cal-1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, before[0].id);
        assert_eq!(events[0].start, before[0].start);
        assert!(
            events[0]
                .description
                .as_deref()
                .unwrap()
                .contains("Resultado: 78-65")
        );
    }

    #[tokio::test]
    async fn stale_event_is_removed_when_an_open_fixture_moved() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        // Event at 15:00; the only open "A vs B" fixture now starts at 18:00.
        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", None)])
            .await
            .unwrap();

        let mut moved = fixture("A", "B", None);
        moved.time = NaiveTime::from_hms_opt(18, 0, 0);

        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        engine.prune_stale("cal-1", &[moved], now).await.unwrap();

        assert!(service.events_of("cal-1").is_empty());
    }

    #[tokio::test]
    async fn result_bearing_fixtures_protect_their_events() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", None)])
            .await
            .unwrap();

        // Same moved time, but the fixture carries a result: not open, so
        // its summary group has no open fixtures and nothing is pruned.
        let mut moved = fixture("A", "B", Some("78-65"));
        moved.time = NaiveTime::from_hms_opt(18, 0, 0);

        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        engine.prune_stale("cal-1", &[moved], now).await.unwrap();

        assert_eq!(service.events_of("cal-1").len(), 1);
    }

    #[tokio::test]
    async fn events_with_unmatched_summaries_are_left_alone() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        // Somebody else's event on the same calendar.
        service
            .insert_event(
                "cal-1",
                &Event {
                    summary: "Dentist".to_string(),
                    start: EventDateTime {
                        date_time: "2025-09-05T10:00:00".to_string(),
                        time_zone: None,
                    },
                    ..Event::default()
                },
            )
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        engine
            .prune_stale("cal-1", &[fixture("A", "B", None)], now)
            .await
            .unwrap();

        assert_eq!(service.events_of("cal-1").len(), 1);
    }

    #[test]
    fn search_window_bounds_are_rfc3339_instants_with_offset() {
        let window = day_window(
            NaiveDate::from_ymd_opt(2025, 9, 1)
                .unwrap()
                .and_hms_opt(15, 0, 0)
                .unwrap(),
        );

        assert_eq!(window.time_min, "2025-08-31T22:00:00+00:00");
        assert_eq!(window.time_max.as_deref(), Some("2025-09-02T02:00:00+00:00"));
    }

    #[tokio::test]
    async fn padded_windows_still_match_only_the_fixtures_day() {
        let service = service_with_calendar();
        let engine = SyncEngine::new(&service, "Europe/Lisbon");

        // Same pairing the evening before, late enough to sit inside the
        // padded window of the 2025-09-01 fixture.
        service
            .insert_event(
                "cal-1",
                &Event {
                    summary: "A vs B".to_string(),
                    description: Some("older description".to_string()),
                    start: EventDateTime {
                        date_time: "2025-08-31T23:00:00".to_string(),
                        time_zone: None,
                    },
                    end: EventDateTime {
                        date_time: "2025-09-01T01:30:00".to_string(),
                        time_zone: None,
                    },
                    ..Event::default()
                },
            )
            .await
            .unwrap();

        engine
            .apply_fixtures("cal-1", &[fixture("A", "B", None)])
            .await
            .unwrap();

        // The adjacent-day event is not treated as a match; the fixture
        // gets its own event and the neighbor keeps its description.
        let events = service.events_of("cal-1");
        assert_eq!(events.len(), 2);
        assert!(
            events
                .iter()
                .any(|e| e.description.as_deref() == Some("older description"))
        );
    }

    #[test]
    fn description_lists_competition_result_and_link() {
        let with_result = event_description(&fixture("A", "B", Some("78-65")));
        assert_eq!(
            with_result,
            "Competição: Campeonato Distrital\nResultado: 78-65\nLink: https://www.fpb.pt/jogo/1\n"
        );

        let without = event_description(&fixture("A", "B", None));
        assert!(!without.contains("Resultado"));
    }
}
