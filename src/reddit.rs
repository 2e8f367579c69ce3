use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, Secrets};
use crate::model::{Event, Message};

const AUTH_BASE: &str = "https://www.reddit.com/";
const OAUTH_BASE: &str = "https://oauth.reddit.com/";

static FULLNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^t[1-6]_[a-z0-9]+$").expect("fullname pattern"));

/// Listing sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    New,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::New => "new",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("http {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected payload: {0}")]
    Payload(String),
}

/// Source of candidate events.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn list_recent(&self, subreddit: &str, sort: Sort, limit: u32) -> Result<Vec<Event>>;
}

/// Posts the announcement and its mention replies.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn post_root(&self, event: &Event, text: &str) -> Result<Message>;

    async fn post_reply(&self, parent: &Message, text: &str) -> Result<Message>;

    async fn get_message(&self, id: &str) -> Result<Message>;
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: Client,
    auth_base: Url,
    api_base: Url,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    throttle: Duration,
    token: Mutex<Option<AccessToken>>,
    last_call: Mutex<Option<Instant>>,
}

impl fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditClient")
            .field("api_base", &self.api_base)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RedditClient {
    pub fn from_config(cfg: &Config, secrets: &Secrets) -> Result<Self> {
        Self::with_base_urls(
            cfg,
            secrets,
            Url::parse(AUTH_BASE)?,
            Url::parse(OAUTH_BASE)?,
        )
    }

    pub fn with_base_urls(
        cfg: &Config,
        secrets: &Secrets,
        auth_base: Url,
        api_base: Url,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.reddit.user_agent.clone())
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            auth_base,
            api_base,
            client_id: cfg.reddit.client_id.clone(),
            client_secret: secrets.reddit_client_secret.clone(),
            username: cfg.reddit.username.clone(),
            password: secrets.reddit_password.clone(),
            throttle: Duration::from_millis(cfg.reddit.throttle_ms),
            token: Mutex::new(None),
            last_call: Mutex::new(None),
        })
    }

    pub fn build_token_request(&self) -> Result<reqwest::Request> {
        let endpoint = self.auth_base.join("api/v1/access_token")?;
        self.http
            .post(endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .build()
            .context("failed to build token request")
    }

    pub fn build_api_request(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<reqwest::Request> {
        let endpoint = self.api_base.join(path).context("invalid Reddit API path")?;
        let mut builder = self.http.request(method, endpoint).bearer_auth(access_token);
        if let Some(form) = form {
            builder = builder.form(form);
        }
        builder.build().context("failed to build Reddit request")
    }

    /// Keep calls at least `throttle` apart.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready = prev + self.throttle;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        self.pace().await;
        let request = self.build_token_request()?;
        let body = self.execute(request).await?;
        let granted: TokenResponse = serde_json::from_value(body)
            .map_err(|e| ClientError::Payload(format!("token response: {}", e)))?;
        // Refresh a minute early.
        let ttl = Duration::from_secs(granted.expires_in.saturating_sub(60));
        info!(username = %self.username, "authenticated with Reddit");
        *guard = Some(AccessToken {
            value: granted.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(granted.access_token)
    }

    async fn call(&self, method: Method, path: &str, form: Option<&[(&str, &str)]>) -> Result<Value> {
        let token = self.access_token().await?;
        self.pace().await;
        let request = self.build_api_request(method, path, &token, form)?;
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value> {
        debug!(method = %request.method(), url = %request.url(), "reddit request");
        let res = self.http.execute(request).await.map_err(ClientError::from)?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Reddit: {}", body);
            return Err(ClientError::RateLimited(body).into());
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "Reddit API error: {}", body);
            return Err(ClientError::Status { status, body }.into());
        }
        let body: Value = res.json().await.map_err(ClientError::from)?;
        Ok(body)
    }

    async fn comment(&self, thing_id: &str, text: &str) -> Result<Message> {
        let form = [("api_type", "json"), ("thing_id", thing_id), ("text", text)];
        let body = self.call(Method::POST, "api/comment", Some(&form[..])).await?;
        let message = parse_comment_response(&body)?;
        info!(parent = thing_id, id = %message.id, "posted comment");
        Ok(message)
    }
}

#[async_trait]
impl FeedSource for RedditClient {
    async fn list_recent(&self, subreddit: &str, sort: Sort, limit: u32) -> Result<Vec<Event>> {
        let path = format!("r/{}/{}?limit={}&raw_json=1", subreddit, sort.as_str(), limit);
        let body = self.call(Method::GET, &path, None).await?;
        parse_listing(&body)
    }
}

#[async_trait]
impl Messenger for RedditClient {
    async fn post_root(&self, event: &Event, text: &str) -> Result<Message> {
        self.comment(&event.id, text).await
    }

    async fn post_reply(&self, parent: &Message, text: &str) -> Result<Message> {
        self.comment(&parent.id, text).await
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        if !FULLNAME.is_match(id) {
            return Err(anyhow!("not a Reddit fullname: {:?}", id));
        }
        let body = self
            .call(Method::GET, &format!("api/info?id={}", id), None)
            .await?;
        let found = parse_listing_names(&body)?;
        if found.iter().any(|name| name == id) {
            Ok(Message { id: id.to_string() })
        } else {
            Err(anyhow!("comment {} not found", id))
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    data: ThingData,
}

#[derive(Deserialize)]
struct ThingData {
    name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    permalink: String,
}

pub fn parse_listing(body: &Value) -> Result<Vec<Event>> {
    let listing = Listing::deserialize(body)
        .map_err(|e| ClientError::Payload(format!("listing: {}", e)))?;
    Ok(listing
        .data
        .children
        .into_iter()
        .map(|t| Event {
            id: t.data.name,
            title: t.data.title,
            permalink: t.data.permalink,
        })
        .collect())
}

fn parse_listing_names(body: &Value) -> Result<Vec<String>> {
    Ok(parse_listing(body)?.into_iter().map(|e| e.id).collect())
}

/// Extract the new comment's fullname from an `api_type=json` comment response.
pub fn parse_comment_response(body: &Value) -> Result<Message> {
    let json = &body["json"];
    if let Some(errors) = json["errors"].as_array() {
        if !errors.is_empty() {
            return Err(ClientError::Payload(format!("comment rejected: {}", Value::Array(errors.clone()))).into());
        }
    }
    json["data"]["things"][0]["data"]["name"]
        .as_str()
        .map(|name| Message { id: name.to_string() })
        .ok_or_else(|| ClientError::Payload("comment response without a name".into()).into())
}
