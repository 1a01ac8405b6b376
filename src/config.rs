use anyhow::Result;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
    #[serde(default)]
    pub calendar_token: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub share_emails: Vec<String>,
    // Month where a new season starts. Changed between revisions of the
    // source site, so it stays configurable.
    #[serde(default = "default_season_cutoff_month")]
    pub season_cutoff_month: u32,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_base_url() -> String {
    "https://www.fpb.pt".to_string()
}

fn default_calendar_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_time_zone() -> String {
    "Europe/Lisbon".to_string()
}

fn default_season_cutoff_month() -> u32 {
    8
}

pub fn load(path: &str) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&text)?;
    Ok(config)
}
