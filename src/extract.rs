use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

// Portuguese month abbreviations as printed in the schedule headings.
const MONTHS: [(&str, u32); 12] = [
    ("JAN", 1),
    ("FEV", 2),
    ("MAR", 3),
    ("ABR", 4),
    ("MAI", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AGO", 8),
    ("SET", 9),
    ("OUT", 10),
    ("NOV", 11),
    ("DEZ", 12),
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document has no team container")]
    MissingTeamContainer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub home: String,
    pub away: String,
    pub result: Option<String>,
    pub location: Option<String>,
    pub competition: Option<String>,
    // Canonical absolute detail URL, the stable identity key.
    pub link: String,
    pub age_group: String,
    pub gender: String,
    pub season: String,
}

impl Fixture {
    pub fn summary(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
    }
}

#[derive(Debug, Clone)]
pub struct TeamInfo {
    pub age_group: String,
    pub gender: String,
    pub source_url: String,
}

#[derive(Debug, Clone)]
pub struct TeamData {
    pub team_name: String,
    pub fixtures: Vec<Fixture>,
    pub team_info: TeamInfo,
}

impl TeamData {
    // Empty when the page carried no dated fixtures.
    pub fn season(&self) -> String {
        self.fixtures
            .first()
            .map(|f| f.season.clone())
            .unwrap_or_default()
    }
}

pub fn extract_team_data(html: &str, source_url: &str, include_played: bool) -> Result<TeamData> {
    extract_with_today(html, source_url, include_played, Utc::now().date_naive())
}

pub fn extract_with_today(
    html: &str,
    source_url: &str,
    include_played: bool,
    today: NaiveDate,
) -> Result<TeamData> {
    let document = Html::parse_document(html);

    let name_selector = Selector::parse("div.team-nome").unwrap();
    let team_name = match document.select(&name_selector).next() {
        Some(node) => collapse_whitespace(&node.text().collect::<String>()),
        None => return Err(ExtractError::MissingTeamContainer.into()),
    };

    let (age_group, gender) = extract_descriptor(&document);
    let mut fixtures = parse_fixtures(&document, source_url, include_played, today);

    dedup_by_link(&mut fixtures);

    let season = season_label(&fixtures);
    for fixture in &mut fixtures {
        fixture.age_group = age_group.clone();
        fixture.gender = gender.clone();
        fixture.season = season.clone();
    }

    Ok(TeamData {
        team_name,
        fixtures,
        team_info: TeamInfo {
            age_group,
            gender,
            source_url: source_url.to_string(),
        },
    })
}

// Descriptor line like "Sub-18 Masculinos": gender is the last whitespace
// token, age group is the remainder.
fn extract_descriptor(document: &Html) -> (String, String) {
    let selector = Selector::parse("div.team-escalao").unwrap();

    let text = document
        .select(&selector)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .unwrap_or_default();

    match text.rsplit_once(' ') {
        Some((age_group, gender)) => (age_group.to_string(), gender.to_string()),
        None => (text, String::new()),
    }
}

fn parse_fixtures(
    document: &Html,
    source_url: &str,
    include_played: bool,
    today: NaiveDate,
) -> Vec<Fixture> {
    let day_selector = Selector::parse("div.day-wrapper").unwrap();
    let date_selector = Selector::parse("h3.date").unwrap();
    let game_selector = Selector::parse("div.game-wrapper").unwrap();

    let mut fixtures = Vec::new();

    for day in document.select(&day_selector) {
        let Some(heading) = day.select(&date_selector).next() else {
            continue;
        };

        let Some(date) = parse_heading_date(&heading.text().collect::<String>()) else {
            continue;
        };

        if date < today && !include_played {
            continue;
        }

        for game in day.select(&game_selector) {
            if let Some(fixture) = parse_game(game, date, source_url) {
                fixtures.push(fixture);
            }
        }
    }

    fixtures
}

// Heading like "01 SET 2025". Unparseable or zero dates are skipped by the
// caller, not errors.
fn parse_heading_date(text: &str) -> Option<NaiveDate> {
    let text = collapse_whitespace(text);
    let mut parts = text.split_whitespace();

    let day: u32 = parts.next()?.parse().ok()?;
    if day == 0 {
        return None;
    }

    let month_abbr = parts.next()?.to_uppercase();
    let month = MONTHS
        .iter()
        .find(|(abbr, _)| *abbr == month_abbr)
        .map(|(_, n)| *n)?;

    let year: i32 = parts.next()?.parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_game(game: ElementRef, date: NaiveDate, source_url: &str) -> Option<Fixture> {
    let hour_selector = Selector::parse("div.hour").unwrap();
    let name_selector = Selector::parse("span.fullName").unwrap();
    let location_selector = Selector::parse("div.location-wrapper").unwrap();
    let competition_selector = Selector::parse("div.competition").unwrap();
    let result_selector = Selector::parse("div.result").unwrap();

    let time = game
        .select(&hour_selector)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .and_then(|t| NaiveTime::parse_from_str(&t, "%H:%M").ok());

    let mut names = game
        .select(&name_selector)
        .map(|node| collapse_whitespace(&node.text().collect::<String>()));
    let home = names.next()?;
    let away = names.next()?;

    let competition = game
        .select(&competition_selector)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .filter(|c| !c.is_empty());

    // The venue is the first text line of the location block that is neither
    // empty nor the competition name.
    let location = game.select(&location_selector).next().and_then(|wrapper| {
        wrapper
            .text()
            .map(collapse_whitespace)
            .find(|line| !line.is_empty() && Some(line) != competition.as_ref())
    });

    let result = game
        .select(&result_selector)
        .next()
        .and_then(|node| parse_result(&node.text().collect::<String>()));

    // The whole game block sits inside the anchor that carries the detail
    // link. Entries without one have no identity and are dropped.
    let href = ElementRef::wrap(game.parent()?)
        .filter(|parent| parent.value().name() == "a")
        .and_then(|parent| parent.value().attr("href").map(str::to_string))?;

    Some(Fixture {
        date,
        time,
        home,
        away,
        result,
        location,
        competition,
        link: absolute_link(source_url, &href),
        age_group: String::new(),
        gender: String::new(),
        season: String::new(),
    })
}

fn parse_result(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d+)\s*-\s*(\d+)").unwrap();
    re.captures(text)
        .map(|cap| format!("{}-{}", &cap[1], &cap[2]))
}

fn absolute_link(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

// Detail link is the identity: when two rows share one, the row carrying a
// result wins, otherwise the first occurrence does.
fn dedup_by_link(fixtures: &mut Vec<Fixture>) {
    let mut seen: Vec<Fixture> = Vec::with_capacity(fixtures.len());

    for fixture in fixtures.drain(..) {
        match seen.iter_mut().find(|f| f.link == fixture.link) {
            Some(existing) => {
                if existing.result.is_none() && fixture.result.is_some() {
                    *existing = fixture;
                }
            }
            None => seen.push(fixture),
        }
    }

    *fixtures = seen;
}

fn season_label(fixtures: &[Fixture]) -> String {
    let years: Vec<i32> = fixtures
        .iter()
        .map(|f| chrono::Datelike::year(&f.date))
        .collect();

    match (years.iter().min(), years.iter().max()) {
        (Some(min), Some(max)) => format!("{min}-{max}"),
        _ => String::new(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
