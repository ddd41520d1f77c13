//! Shared HTTP client for the Google Sheets, Calendar and Drive APIs.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use url::Url;

use super::SourceError;
use crate::config::SourcesConfig;

pub const USER_AGENT: &str = "Syncline-Triggers/1.0";

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct GoogleApiClient {
    http: Client,
    sheets_base: Url,
    calendar_base: Url,
    drive_base: Url,
    page_size: u32,
}

impl GoogleApiClient {
    pub fn new(config: &SourcesConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| SourceError::Configuration {
                details: err.to_string(),
            })?;

        Ok(Self {
            http,
            sheets_base: parse_base(&config.google_sheets_api_base)?,
            calendar_base: parse_base(&config.google_calendar_api_base)?,
            drive_base: parse_base(&config.google_drive_api_base)?,
            page_size: config.page_size,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub(crate) fn sheets_url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        join_segments(&self.sheets_base, segments)
    }

    pub(crate) fn calendar_url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        join_segments(&self.calendar_base, segments)
    }

    pub(crate) fn drive_url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        join_segments(&self.drive_base, segments)
    }

    /// GETs `url` with the bearer token and decodes a JSON body.
    pub(crate) async fn get_json(&self, url: Url, access_token: &str) -> Result<Value, SourceError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SourceError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(SourceError::RateLimited { retry_after });
        }

        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        serde_json::from_str(&body).map_err(|err| SourceError::MalformedResponse {
            details: err.to_string(),
        })
    }
}

fn parse_base(value: &str) -> Result<Url, SourceError> {
    Url::parse(value).map_err(|err| SourceError::Configuration {
        details: format!("invalid API base '{value}': {err}"),
    })
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, SourceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SourceError::Configuration {
            details: format!("API base '{base}' cannot carry a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push('…');
        cut
    }
}
