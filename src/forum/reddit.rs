//! Reddit OAuth client
//!
//! Talks to the authenticated API host with a bearer token obtained from a
//! long-lived refresh token. The token is cached and renewed shortly before
//! it expires, or immediately after a 401.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Comment, FlairEntry, FlairSink, FlairSource, ForumError, KarmaForum, RejectedRow, Submission,
};
use crate::config::RedditConfig;
use crate::flair::PlannedUpdate;

/// Rows per `flaircsv` request
pub const FLAIR_CSV_BATCH: usize = 100;

/// Entries per `flairlist` page
const FLAIR_LIST_PAGE: usize = 1000;

/// Renew this long before the token's stated expiry
const TOKEN_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlairListPage {
    #[serde(default)]
    users: Vec<FlairEntry>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlairCsvRow {
    ok: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    json: JsonErrors,
}

#[derive(Debug, Deserialize)]
struct JsonErrors {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

impl JsonErrors {
    fn into_result(self, user: &str) -> Result<(), ForumError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let reason = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(ForumError::Rejected(vec![RejectedRow {
            user: user.to_string(),
            reason,
        }]))
    }
}

pub struct RedditClient {
    config: RedditConfig,
    http_client: Client,
    api_base: Url,
    token: RwLock<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Result<Self, ForumError> {
        let api_base = Url::parse(&config.api_base_url)
            .map_err(|e| ForumError::Url(format!("{}: {}", config.api_base_url, e)))?;
        Url::parse(&config.auth_url)
            .map_err(|e| ForumError::Url(format!("{}: {}", config.auth_url, e)))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            http_client,
            api_base,
            token: RwLock::new(None),
        })
    }

    /// Current bearer token, refreshing it when stale
    async fn access_token(&self) -> Result<String, ForumError> {
        let now = Utc::now();
        if let Some(token) = self.token.read().await.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.value.clone());
        }

        let token = self.refresh_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn refresh_token(&self) -> Result<AccessToken, ForumError> {
        debug!("Refreshing access token");

        let resp = self
            .http_client
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ForumError::Auth(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(ForumError::Status {
                endpoint: "access_token".to_string(),
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = resp.json().await.map_err(|e| ForumError::Decode {
            endpoint: "access_token".to_string(),
            reason: e.to_string(),
        })?;

        if let Some(error) = body.error {
            return Err(ForumError::Auth(error));
        }

        let value = body
            .access_token
            .ok_or_else(|| ForumError::Auth("no access_token in response".to_string()))?;

        info!(expires_in = body.expires_in, "Obtained access token");

        Ok(AccessToken {
            value,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        })
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    fn endpoint(&self, path: &str) -> Result<Url, ForumError> {
        self.api_base
            .join(path)
            .map_err(|e| ForumError::Url(format!("{}: {}", path, e)))
    }

    /// Send an authenticated request, retrying once with a fresh token on 401
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<T, ForumError> {
        let url = self.endpoint(path)?;
        let mut retried = false;

        loop {
            let token = self.access_token().await?;
            let mut request = self
                .http_client
                .request(method.clone(), url.clone())
                .bearer_auth(token)
                .query(&[("raw_json", "1")])
                .query(query);
            if !form.is_empty() {
                request = request.form(form);
            }

            let resp = request.send().await?;
            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!(endpoint = %path, "Access token rejected, refreshing");
                self.invalidate_token().await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                return Err(ForumError::Status {
                    endpoint: path.to_string(),
                    status: status.as_u16(),
                });
            }

            return resp.json().await.map_err(|e| ForumError::Decode {
                endpoint: path.to_string(),
                reason: e.to_string(),
            });
        }
    }

    async fn flair_page(
        &self,
        forum: &str,
        after: Option<&str>,
        name: Option<&str>,
    ) -> Result<FlairListPage, ForumError> {
        let path = format!("r/{}/api/flairlist", checked_forum(forum)?);
        let mut query = vec![("limit", FLAIR_LIST_PAGE.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        self.call(Method::GET, &path, &query, &[]).await
    }

    async fn info(&self, fullname: &str) -> Result<Option<Thing<serde_json::Value>>, ForumError> {
        let listing: Listing<serde_json::Value> = self
            .call(Method::GET, "api/info", &[("id", fullname.to_string())], &[])
            .await?;
        Ok(listing.data.children.into_iter().next())
    }
}

#[async_trait]
impl FlairSource for RedditClient {
    async fn fetch_flairs(&self, forum: &str) -> Result<Vec<FlairEntry>, ForumError> {
        let mut entries = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.flair_page(forum, after.as_deref(), None).await?;
            entries.extend(page.users);

            match page.next {
                Some(next) if !next.is_empty() => after = Some(next),
                _ => break,
            }
        }

        debug!(forum = %forum, users = entries.len(), "Fetched flair list");
        Ok(entries)
    }
}

#[async_trait]
impl FlairSink for RedditClient {
    async fn apply_flairs(&self, forum: &str, updates: &[PlannedUpdate]) -> Result<(), ForumError> {
        let path = format!("r/{}/api/flaircsv", checked_forum(forum)?);
        let mut rejected = Vec::new();

        for chunk in updates.chunks(FLAIR_CSV_BATCH) {
            let rows: Vec<FlairCsvRow> = self
                .call(
                    Method::POST,
                    &path,
                    &[],
                    &[("flair_csv", flair_csv(chunk))],
                )
                .await?;

            if rows.len() != chunk.len() {
                warn!(
                    forum = %forum,
                    sent = chunk.len(),
                    acknowledged = rows.len(),
                    "flaircsv acknowledged a different number of rows"
                );
            }

            rejected.extend(rejected_rows(chunk, rows));
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ForumError::Rejected(rejected))
        }
    }
}

#[async_trait]
impl KarmaForum for RedditClient {
    async fn new_comments(&self, forum: &str, limit: usize) -> Result<Vec<Comment>, ForumError> {
        let path = format!("r/{}/comments", checked_forum(forum)?);
        let listing: Listing<Comment> = self
            .call(
                Method::GET,
                &path,
                &[("limit", limit.clamp(1, 100).to_string())],
                &[],
            )
            .await?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t1")
            .map(|thing| thing.data)
            .collect())
    }

    async fn comment(&self, fullname: &str) -> Result<Option<Comment>, ForumError> {
        match self.info(fullname).await? {
            Some(thing) if thing.kind == "t1" => decode_thing(thing.data, "api/info").map(Some),
            _ => Ok(None),
        }
    }

    async fn submission(&self, fullname: &str) -> Result<Option<Submission>, ForumError> {
        match self.info(fullname).await? {
            Some(thing) if thing.kind == "t3" => decode_thing(thing.data, "api/info").map(Some),
            _ => Ok(None),
        }
    }

    async fn user_flair(&self, forum: &str, user: &str) -> Result<Option<FlairEntry>, ForumError> {
        let page = self.flair_page(forum, None, Some(user)).await?;
        Ok(page
            .users
            .into_iter()
            .find(|entry| entry.user.eq_ignore_ascii_case(user)))
    }

    async fn set_flair(
        &self,
        forum: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> Result<(), ForumError> {
        let path = format!("r/{}/api/flair", checked_forum(forum)?);
        let envelope: JsonEnvelope = self
            .call(
                Method::POST,
                &path,
                &[],
                &[
                    ("api_type", "json".to_string()),
                    ("name", user.to_string()),
                    ("text", text.to_string()),
                    ("css_class", css_class.to_string()),
                ],
            )
            .await?;
        envelope.json.into_result(user)
    }

    async fn reply(&self, parent_fullname: &str, text: &str) -> Result<(), ForumError> {
        let envelope: JsonEnvelope = self
            .call(
                Method::POST,
                "api/comment",
                &[],
                &[
                    ("api_type", "json".to_string()),
                    ("thing_id", parent_fullname.to_string()),
                    ("text", text.to_string()),
                ],
            )
            .await?;
        envelope.json.into_result(parent_fullname)
    }
}

fn decode_thing<T: DeserializeOwned>(data: serde_json::Value, endpoint: &str) -> Result<T, ForumError> {
    serde_json::from_value(data).map_err(|e| ForumError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

/// Subreddit names go into URL paths unescaped
/// Rows of `chunk` that flaircsv refused or never acknowledged
fn rejected_rows(chunk: &[PlannedUpdate], rows: Vec<FlairCsvRow>) -> Vec<RejectedRow> {
    let acknowledged = rows.len().min(chunk.len());
    let mut rejected: Vec<RejectedRow> = chunk
        .iter()
        .zip(rows)
        .filter(|(_, row)| !row.ok)
        .map(|(update, row)| RejectedRow {
            user: update.user.clone(),
            reason: if row.errors.is_null() {
                row.status
            } else {
                format!("{} {}", row.status, row.errors)
            },
        })
        .collect();

    rejected.extend(chunk[acknowledged..].iter().map(|update| RejectedRow {
        user: update.user.clone(),
        reason: "not acknowledged".to_string(),
    }));

    rejected
}

fn checked_forum(forum: &str) -> Result<&str, ForumError> {
    if !forum.is_empty() && forum.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(forum)
    } else {
        Err(ForumError::Url(format!("invalid subreddit name '{}'", forum)))
    }
}

/// `user,text,css_class` rows for the bulk flair endpoint
fn flair_csv(updates: &[PlannedUpdate]) -> String {
    updates
        .iter()
        .map(|u| {
            [
                csv_field(&u.user),
                csv_field(&u.flair_text),
                csv_field(&u.flair_css_class),
            ]
            .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
