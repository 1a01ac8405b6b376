use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::extract::TeamData;

const TEAMS_FILE: &str = "teams.csv";
const GAMES_FILE: &str = "games.csv";

// Team names that are placeholders, not real teams (knockout brackets,
// 3x3 sides and the like).
const EXCLUDED_TERMS: [&str; 4] = ["venc", "º", "designar", "3x3"];

// Append-only ';'-separated logs, not keyed tables. Duplicate rows across
// runs are possible when the crawl ledger is bypassed.
pub struct Store {
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TeamRow {
    pub id: u64,
    pub name: String,
    pub age_group: String,
    pub gender: String,
    pub season: String,
    pub url: String,
}

impl Store {
    pub fn open(dir: &Path) -> Result<Store> {
        fs::create_dir_all(dir)?;
        Ok(Store {
            dir: dir.to_path_buf(),
        })
    }

    pub fn append_team(&self, id: u64, data: &TeamData) -> Result<()> {
        let row = [
            id.to_string(),
            data.team_name.clone(),
            data.team_info.age_group.clone(),
            data.team_info.gender.clone(),
            data.season(),
            data.team_info.source_url.clone(),
        ];
        self.append_row(TEAMS_FILE, &row)
    }

    pub fn append_fixtures(&self, data: &TeamData) -> Result<()> {
        for fixture in &data.fixtures {
            let row = [
                data.team_name.clone(),
                fixture.age_group.clone(),
                fixture.gender.clone(),
                fixture.date.format("%Y-%m-%d").to_string(),
                fixture
                    .time
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_default(),
                fixture.summary(),
                fixture.result.clone().unwrap_or_default(),
                fixture.location.clone().unwrap_or_default(),
                fixture.competition.clone().unwrap_or_default(),
                fixture.season.clone(),
                fixture.link.clone(),
            ];
            self.append_row(GAMES_FILE, &row)?;
        }
        Ok(())
    }

    // The scraped set is derived from the team store's id column rather than
    // persisted separately.
    pub fn scraped_ids(&self) -> Result<HashSet<u64>> {
        let path = self.dir.join(TEAMS_FILE);
        if !path.exists() {
            return Ok(HashSet::new());
        }

        let mut ids = HashSet::new();
        for line in fs::read_to_string(path)?.lines() {
            if let Some(id) = line.split(';').next().and_then(|s| s.parse().ok()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    pub fn load_teams(&self, today: NaiveDate, season_cutoff_month: u32) -> Result<Vec<TeamRow>> {
        let path = self.dir.join(TEAMS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let (current_season, extra_season) = current_seasons(today, season_cutoff_month);

        let mut teams = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            let fields: Vec<&str> = line.split(';').collect();
            if fields.len() < 6 {
                continue;
            }

            let Some(id) = fields[0].parse::<u64>().ok() else {
                continue;
            };

            let name = fields[1].to_string();
            let lowered = name.to_lowercase();
            if EXCLUDED_TERMS.iter().any(|term| lowered.contains(term)) {
                continue;
            }

            let season = fields[4].to_string();
            let valid = season == current_season
                || extra_season.as_deref().is_some_and(|extra| season == extra);
            if !valid {
                continue;
            }

            teams.push(TeamRow {
                id,
                name,
                age_group: fields[2].to_string(),
                gender: fields[3].to_string(),
                season,
                url: fields[5].to_string(),
            });
        }

        Ok(teams)
    }

    fn append_row(&self, file: &str, fields: &[String]) -> Result<()> {
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        writeln!(handle, "{}", fields.join(";"))?;
        Ok(())
    }
}

// Before the cutoff month the running season started last year; a degenerate
// single-year label also shows up on the site in that window.
fn current_seasons(today: NaiveDate, cutoff_month: u32) -> (String, Option<String>) {
    let year = today.year();

    if today.month() < cutoff_month {
        (
            format!("{}-{}", year - 1, year),
            Some(format!("{year}-{year}")),
        )
    } else {
        (format!("{}-{}", year, year + 1), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Fixture, TeamInfo};
    use chrono::NaiveTime;
    use tempfile::TempDir;

    fn sample_team(name: &str, season: &str) -> TeamData {
        TeamData {
            team_name: name.to_string(),
            fixtures: vec![Fixture {
                date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
                time: NaiveTime::from_hms_opt(15, 0, 0),
                home: name.to_string(),
                away: "Louletano".to_string(),
                result: None,
                location: Some("Pavilhão Municipal".to_string()),
                competition: Some("Campeonato Distrital".to_string()),
                link: "https://www.fpb.pt/jogo/1".to_string(),
                age_group: "Sub-18".to_string(),
                gender: "Masculinos".to_string(),
                season: season.to_string(),
            }],
            team_info: TeamInfo {
                age_group: "Sub-18".to_string(),
                gender: "Masculinos".to_string(),
                source_url: "https://www.fpb.pt/equipa/equipa_7".to_string(),
            },
        }
    }

    #[test]
    fn appended_team_ids_come_back_as_scraped() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.append_team(7, &sample_team("CB Tavira", "2025-2026")).unwrap();
        store.append_team(9, &sample_team("Louletano", "2025-2026")).unwrap();

        let ids = store.scraped_ids().unwrap();
        assert!(ids.contains(&7));
        assert!(ids.contains(&9));
        assert!(!ids.contains(&8));
    }

    #[test]
    fn fixture_rows_follow_the_store_layout() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let team = sample_team("CB Tavira", "2025-2026");
        store.append_fixtures(&team).unwrap();

        let contents = fs::read_to_string(dir.path().join(GAMES_FILE)).unwrap();
        assert_eq!(
            contents.trim_end(),
            "CB Tavira;Sub-18;Masculinos;2025-09-01;15:00;CB Tavira vs Louletano;;\
             Pavilhão Municipal;Campeonato Distrital;2025-2026;https://www.fpb.pt/jogo/1"
        );
    }

    #[test]
    fn listing_filters_placeholder_names_and_other_seasons() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.append_team(1, &sample_team("CB Tavira", "2025-2026")).unwrap();
        store.append_team(2, &sample_team("Venc. QF1", "2025-2026")).unwrap();
        store.append_team(3, &sample_team("Old Boys", "2023-2024")).unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let teams = store.load_teams(today, 8).unwrap();

        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].name, "CB Tavira");
        assert_eq!(teams[0].id, 1);
    }

    #[test]
    fn pre_cutoff_dates_accept_last_years_season() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        assert_eq!(
            current_seasons(today, 8),
            (
                "2024-2025".to_string(),
                Some("2025-2025".to_string())
            )
        );

        let later = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        assert_eq!(current_seasons(later, 8), ("2025-2026".to_string(), None));
    }
}
