use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Settings;
use crate::http_client::http_client;
use crate::state::{JobRecord, MatchStatus};

/// REST surface the synchronizer depends on. Kept as a trait so scenario
/// tests can script responses without a server.
pub trait StatusApi {
    fn fetch_match_status(&self, match_id: &str) -> Result<MatchStatusPayload>;
    fn fetch_match(&self, match_id: &str) -> Result<MatchResource>;
    fn fetch_job(&self, job_id: &str) -> Result<JobRecord>;
    /// Requests a new simulated match; returns the job id accepted by the
    /// backend.
    fn create_match(&self, squad_id: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatusPayload {
    pub status: MatchStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResource {
    pub id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub status: Option<MatchStatus>,
    pub result: Option<MatchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub home_score: u8,
    pub away_score: u8,
    #[serde(default)]
    pub winner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestStatusApi {
    base: String,
    token: Option<String>,
}

impl RestStatusApi {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base: base.into(),
            token,
        }
    }

    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let base = settings.api_base.clone()?;
        Some(Self::new(base, settings.api_token.clone()))
    }

    fn get(&self, url: &str) -> Result<String> {
        let client = http_client()?;
        let mut request = client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("backend rejected request: {url}"))?;
        response.text().context("failed to read response body")
    }
}

impl StatusApi for RestStatusApi {
    fn fetch_match_status(&self, match_id: &str) -> Result<MatchStatusPayload> {
        let url = format!("{}/matches/{match_id}/status", self.base);
        let body = self.get(&url)?;
        parse_status_json(&body)
    }

    fn fetch_match(&self, match_id: &str) -> Result<MatchResource> {
        let url = format!("{}/matches/{match_id}", self.base);
        let body = self.get(&url)?;
        parse_match_json(&body)
    }

    fn fetch_job(&self, job_id: &str) -> Result<JobRecord> {
        let url = format!("{}/matches/jobs/{job_id}", self.base);
        let body = self.get(&url)?;
        parse_job_json(&body)
    }

    fn create_match(&self, squad_id: &str) -> Result<String> {
        let url = format!("{}/matches", self.base);
        let client = http_client()?;
        let mut request = client
            .post(&url)
            .json(&serde_json::json!({ "squadId": squad_id }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("backend rejected match request: {url}"))?;
        let body = response.text().context("failed to read response body")?;
        parse_job_ticket_json(&body)
    }
}

pub fn parse_status_json(body: &str) -> Result<MatchStatusPayload> {
    serde_json::from_str(body).context("unexpected match status payload")
}

pub fn parse_job_json(body: &str) -> Result<JobRecord> {
    serde_json::from_str(body).context("unexpected job payload")
}

pub fn parse_job_ticket_json(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body).context("unexpected job ticket payload")?;
    pick_string(&value, &["jobId", "id"])
        .ok_or_else(|| anyhow!("job ticket response carries no job id"))
}

/// The match resource is the loosest payload the backend serves; team fields
/// show up as plain strings or as `{ name }` objects depending on the route
/// that produced the match.
pub fn parse_match_json(body: &str) -> Result<MatchResource> {
    let value: Value = serde_json::from_str(body).context("unexpected match payload")?;
    let id = pick_string(&value, &["id", "matchId"])
        .ok_or_else(|| anyhow!("match resource carries no id"))?;
    let status = pick_string(&value, &["status"])
        .as_deref()
        .and_then(MatchStatus::from_wire);
    let result = value
        .get("result")
        .and_then(|v| serde_json::from_value::<MatchResult>(v.clone()).ok());
    Ok(MatchResource {
        id,
        home_team: pick_string(&value, &["homeTeam", "home"]),
        away_team: pick_string(&value, &["awayTeam", "away"]),
        status,
        result,
    })
}

fn pick_string(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = value.get(*key)
            && let Some(text) = as_string(v)
        {
            return Some(text);
        }
    }
    None
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("name") {
                return non_empty(name).map(str::to_string);
            }
            None
        }
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
