use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::record::VideoRecord;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8081/v1/funny-app";

/// Supplies the bearer token injected into every request.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("funny-tui/{}", crate::VERSION),
            timeout: Duration::from_secs(20),
            http_client: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session expired or missing, please sign in again")]
    Unauthorized,
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("server returned no data for {0}")]
    MissingData(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_shared: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embed_link: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub desc: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_private: bool,
}

impl From<ShareLink> for VideoRecord {
    fn from(link: ShareLink) -> Self {
        VideoRecord::new(
            link.id,
            link.user_shared,
            link.title,
            link.embed_link,
            link.desc,
            link.is_private,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mfa_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub user: Option<UserDetail>,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetup {
    pub secret: String,
    pub qr_code: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api client user agent required");
        }
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("api: invalid base url {base:?}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(config.timeout).build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            tokens: None,
        })
    }

    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn top_videos(&self) -> Result<Vec<ShareLink>> {
        self.list(&["top-videos"])
    }

    pub fn private_videos(&self) -> Result<Vec<ShareLink>> {
        self.list(&["private-videos"])
    }

    pub fn share(&self, request: &ShareRequest) -> Result<ShareLink> {
        if request.url.trim().is_empty() {
            bail!("api: video url is required");
        }
        let resp = self.request(Method::POST, &["share-links"], &[], Some(request))?;
        data(resp, "share-links")
    }

    pub fn delete_share(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            bail!("api: video id is required");
        }
        let resp = self.request::<()>(Method::DELETE, &["share-links", id], &[], None)?;
        let envelope: Envelope<Value> = resp.json().context("api: decode delete response")?;
        Ok(envelope.message.unwrap_or_else(|| "Deleted".to_string()))
    }

    pub fn join(&self, email: &str) -> Result<UserInfo> {
        let body = serde_json::json!({ "email": normalize_email(email) });
        let resp = self.request(Method::POST, &["user", "join"], &[], Some(&body))?;
        data(resp, "user/join")
    }

    pub fn verify_mfa(
        &self,
        username: &str,
        otp: &str,
        session_token: Option<&str>,
    ) -> Result<UserInfo> {
        let body = serde_json::json!({
            "otp": otp,
            "username": normalize_email(username),
            "sessionToken": session_token,
        });
        let resp = self.request(Method::POST, &["user", "mfa", "verify"], &[], Some(&body))?;
        data(resp, "user/mfa/verify")
    }

    pub fn mfa_setup(&self, username: &str) -> Result<MfaSetup> {
        let query = [("username", normalize_email(username))];
        let resp = self.request::<()>(Method::GET, &["user", "mfa", "setup"], &query, None)?;
        data(resp, "user/mfa/setup")
    }

    pub fn enable_mfa(&self, username: &str, secret: &str, otp: &str) -> Result<()> {
        let body = serde_json::json!({
            "otp": otp,
            "username": normalize_email(username),
            "secret": secret,
        });
        self.request(Method::POST, &["user", "mfa", "enable"], &[], Some(&body))?;
        Ok(())
    }

    pub fn disable_mfa(&self, username: &str, otp: &str) -> Result<()> {
        let body = serde_json::json!({
            "otp": otp,
            "username": normalize_email(username),
        });
        self.request(Method::POST, &["user", "mfa", "disable"], &[], Some(&body))?;
        Ok(())
    }

    fn list(&self, segments: &[&str]) -> Result<Vec<ShareLink>> {
        let resp = self.request::<()>(Method::GET, segments, &[], None)?;
        let envelope: Envelope<Vec<ShareLink>> = resp
            .json()
            .with_context(|| format!("api: decode {}", segments.join("/")))?;
        Ok(envelope.data.unwrap_or_default())
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("api: base url cannot carry a path"))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Response> {
        let url = self.endpoint(segments, query)?;
        debug!(%method, %url, "api request");

        let mut req = self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = self.tokens.as_ref().and_then(|tokens| tokens.token()) {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            Err(error_from_body(status, &body).into())
        }
    }
}

fn data<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let envelope: Envelope<T> = resp
        .json()
        .with_context(|| format!("api: decode {what} response"))?;
    envelope
        .data
        .ok_or_else(|| ApiError::MissingData(what.to_string()).into())
}

fn error_from_body(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.trim().is_empty());
    match (status, message) {
        (_, Some(message)) => ApiError::Server { status, message },
        (401, None) => ApiError::Unauthorized,
        (_, None) => ApiError::Server {
            status,
            message: format!("request failed with status {status}"),
        },
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn opaque_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
