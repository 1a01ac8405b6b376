use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar resource not found")]
    NotFound,
    #[error("calendar API error: {status} {detail}")]
    Api { status: StatusCode, detail: String },
    #[error("calendar transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub time_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(default)]
    pub date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub start: EventDateTime,
    #[serde(default)]
    pub end: EventDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclScope {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRule {
    pub scope: AclScope,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct TimeWindow {
    pub time_min: String,
    pub time_max: Option<String>,
}

// The external calendar capability. Implementations must keep "not found"
// distinguishable from other failures; the directory and the reconciliation
// engine branch on it.
pub trait CalendarService {
    async fn get_calendar(&self, calendar_id: &str) -> Result<Calendar, CalendarError>;
    async fn insert_calendar(&self, calendar: &Calendar) -> Result<Calendar, CalendarError>;
    async fn update_calendar(
        &self,
        calendar_id: &str,
        calendar: &Calendar,
    ) -> Result<Calendar, CalendarError>;
    async fn list_events(
        &self,
        calendar_id: &str,
        window: Option<&TimeWindow>,
        query: Option<&str>,
    ) -> Result<Vec<Event>, CalendarError>;
    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, CalendarError>;
    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, CalendarError>;
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
    async fn list_acl(&self, calendar_id: &str) -> Result<Vec<AclRule>, CalendarError>;
    async fn insert_acl(&self, calendar_id: &str, rule: &AclRule) -> Result<AclRule, CalendarError>;
}

// Calendar-v3 shaped REST backend with a bearer token.
pub struct HttpCalendarService {
    client: Client,
    base: String,
    token: String,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl HttpCalendarService {
    pub fn new(base: &str, token: &str) -> Result<HttpCalendarService> {
        Ok(HttpCalendarService {
            client: Client::builder().build()?,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CalendarError::NotFound);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status, detail });
        }
        Ok(response)
    }
}

impl CalendarService for HttpCalendarService {
    async fn get_calendar(&self, calendar_id: &str) -> Result<Calendar, CalendarError> {
        let response = self
            .client
            .get(self.url(&format!("/calendars/{calendar_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn insert_calendar(&self, calendar: &Calendar) -> Result<Calendar, CalendarError> {
        let response = self
            .client
            .post(self.url("/calendars"))
            .bearer_auth(&self.token)
            .json(calendar)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_calendar(
        &self,
        calendar_id: &str,
        calendar: &Calendar,
    ) -> Result<Calendar, CalendarError> {
        let response = self
            .client
            .put(self.url(&format!("/calendars/{calendar_id}")))
            .bearer_auth(&self.token)
            .json(calendar)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: Option<&TimeWindow>,
        query: Option<&str>,
    ) -> Result<Vec<Event>, CalendarError> {
        let mut request = self
            .client
            .get(self.url(&format!("/calendars/{calendar_id}/events")))
            .bearer_auth(&self.token)
            .query(&[("singleEvents", "true"), ("orderBy", "startTime")]);

        if let Some(window) = window {
            request = request.query(&[("timeMin", window.time_min.as_str())]);
            if let Some(time_max) = &window.time_max {
                request = request.query(&[("timeMax", time_max.as_str())]);
            }
        }
        if let Some(query) = query {
            request = request.query(&[("q", query)]);
        }

        let response = request.send().await?;
        let list: ItemList<Event> = Self::check(response).await?.json().await?;
        Ok(list.items)
    }

    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, CalendarError> {
        let response = self
            .client
            .post(self.url(&format!("/calendars/{calendar_id}/events")))
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, CalendarError> {
        let response = self
            .client
            .put(self.url(&format!("/calendars/{calendar_id}/events/{event_id}")))
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(self.url(&format!("/calendars/{calendar_id}/events/{event_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_acl(&self, calendar_id: &str) -> Result<Vec<AclRule>, CalendarError> {
        let response = self
            .client
            .get(self.url(&format!("/calendars/{calendar_id}/acl")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let list: ItemList<AclRule> = Self::check(response).await?.json().await?;
        Ok(list.items)
    }

    async fn insert_acl(&self, calendar_id: &str, rule: &AclRule) -> Result<AclRule, CalendarError> {
        let response = self
            .client
            .post(self.url(&format!("/calendars/{calendar_id}/acl")))
            .bearer_auth(&self.token)
            .json(rule)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

// Persisted {team URL -> calendar id} mapping. Every mutation is a full
// read-modify-write of one JSON object, so resolutions must not interleave.
pub struct CalendarDirectory {
    path: PathBuf,
    time_zone: String,
}

impl CalendarDirectory {
    pub fn new(path: PathBuf, time_zone: &str) -> CalendarDirectory {
        CalendarDirectory {
            path,
            time_zone: time_zone.to_string(),
        }
    }

    pub fn mapped_urls(&self) -> Result<Vec<String>> {
        Ok(self.load_mappings()?.into_keys().collect())
    }

    pub async fn resolve<S: CalendarService>(
        &self,
        service: &S,
        team_url: &str,
        desired_name: &str,
    ) -> Result<String> {
        let mut mappings = self.load_mappings()?;

        if let Some(calendar_id) = mappings.get(team_url).cloned() {
            match service.get_calendar(&calendar_id).await {
                Ok(existing) => {
                    println!("Found existing calendar for URL {team_url}");
                    if existing.summary != desired_name {
                        println!(
                            "Renaming calendar: {} -> {desired_name}",
                            existing.summary
                        );
                        let renamed = Calendar {
                            summary: desired_name.to_string(),
                            ..existing
                        };
                        service.update_calendar(&calendar_id, &renamed).await?;
                    }
                    return Ok(calendar_id);
                }
                // The mapping went stale on the service side. Recover
                // locally by recreating.
                Err(CalendarError::NotFound) => {
                    println!("Calendar not found, creating a new one...");
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            println!("No calendar mapping found, creating a new one...");
        }

        let created = service
            .insert_calendar(&Calendar {
                id: String::new(),
                summary: desired_name.to_string(),
                time_zone: self.time_zone.clone(),
            })
            .await?;
        println!("Created calendar: {} (ID: {})", created.summary, created.id);

        mappings.insert(team_url.to_string(), created.id.clone());
        self.store_mappings(&mappings)?;

        Ok(created.id)
    }

    fn load_mappings(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn store_mappings(&self, mappings: &BTreeMap<String, String>) -> Result<()> {
        // On a fresh install nothing has created the data directory yet;
        // losing the mapping here would orphan a calendar the service
        // already holds.
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(mappings)?)?;
        Ok(())
    }
}

// Grants calendar access to each address that does not already hold a
// user-scope rule.
pub async fn share_with_emails<S: CalendarService>(
    service: &S,
    calendar_id: &str,
    emails: &[String],
    role: &str,
) -> Result<()> {
    let acl = service.list_acl(calendar_id).await?;

    for email in emails {
        let already_shared = acl
            .iter()
            .any(|rule| rule.scope.scope_type == "user" && rule.scope.value == *email);

        if already_shared {
            println!("Calendar {calendar_id} is already shared with {email}");
            continue;
        }

        service
            .insert_acl(
                calendar_id,
                &AclRule {
                    scope: AclScope {
                        scope_type: "user".to_string(),
                        value: email.clone(),
                    },
                    role: role.to_string(),
                },
            )
            .await?;
        println!("Shared calendar {calendar_id} with {email}");
    }

    Ok(())
}
