//! HTTP transport, session acquisition, and readiness polling.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use tbsync_core::config::PlatformConfig;
use tbsync_core::SessionToken;

const AUTH_HEADER: &str = "X-Authorization";
const LOGIN_PATH: &str = "/api/auth/login";
const HEALTH_PATH: &str = "/api/health";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from platform API calls.
///
/// `Status` and `Transport` are the two halves of "the request failed":
/// one got a response with a non-2xx status, the other got no response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("HTTP {status} for {path}: {detail}")]
    Status {
        status: u16,
        path: String,
        detail: String,
    },

    #[error("Request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Empty response from {path}")]
    EmptyBody { path: String },

    #[error("Response from {path} is missing field `{field}`")]
    MissingField { path: String, field: &'static str },

    #[error("Search of {listing} still had more results after {pages} pages")]
    SearchExhausted { listing: String, pages: u32 },

    #[error("Platform API did not become ready within {waited_secs}s")]
    NotReady { waited_secs: u64 },

    #[error("HTTP client setup failed: {0}")]
    Build(#[source] reqwest::Error),
}

impl RequestError {
    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Client for the platform's REST API.
///
/// Clone is cheap (inner Arc in `reqwest::Client`).
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl ApiClient {
    /// Build a client whose every request is bounded by `config.request_timeout_secs`.
    pub fn new(config: &PlatformConfig) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(RequestError::Build)?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            ready_timeout: config.ready_timeout(),
            ready_poll: config.ready_poll_interval(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request and decode the body as JSON.
    ///
    /// An empty (or `null`) body is a successful `None`.
    pub async fn request<B>(
        &self,
        path: &str,
        method: Method,
        payload: Option<&B>,
        token: Option<&SessionToken>,
    ) -> Result<Option<Value>, RequestError>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!(%method, path, "API request");

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTH_HEADER, format!("Bearer {}", token.as_str()));
        }
        if let Some(body) = payload {
            builder = builder.json(body);
        }

        let transport = |source| RequestError::Transport {
            path: path.to_string(),
            source,
        };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                detail: body,
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str(&body) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(RequestError::Decode {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Like [`request`](Self::request), decoding into a typed record.
    pub async fn request_json<T, B>(
        &self,
        path: &str,
        method: Method,
        payload: Option<&B>,
        token: Option<&SessionToken>,
    ) -> Result<Option<T>, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match self.request(path, method, payload, token).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| RequestError::Decode {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Authenticated GET decoded into `T`.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &SessionToken,
    ) -> Result<Option<T>, RequestError> {
        self.request_json::<T, ()>(path, Method::GET, None, Some(token))
            .await
    }

    /// Authenticated POST decoded into `T`.
    pub(crate) async fn post_json<T, B>(
        &self,
        path: &str,
        payload: &B,
        token: &SessionToken,
    ) -> Result<Option<T>, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(path, Method::POST, Some(payload), Some(token))
            .await
    }

    /// Exchange username and password for a session token.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken, RequestError> {
        let response: Option<LoginResponse> = self
            .request_json(
                LOGIN_PATH,
                Method::POST,
                Some(&LoginRequest { username, password }),
                None,
            )
            .await?;

        let token = response
            .and_then(|r| r.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RequestError::MissingField {
                path: LOGIN_PATH.to_string(),
                field: "token",
            })?;

        tracing::info!(username, "Authenticated against platform");
        Ok(SessionToken::new(token))
    }

    /// Poll the health endpoint until the API answers.
    ///
    /// 401 and 403 count as ready: the service is up, only unauthenticated.
    pub async fn wait_until_ready(&self) -> Result<(), RequestError> {
        let started = Instant::now();
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        let probe_timeout = HEALTH_PROBE_TIMEOUT.min(self.ready_timeout.max(Duration::from_secs(1)));

        loop {
            match self.http.get(&url).timeout(probe_timeout).send().await {
                Ok(resp) if is_ready_status(resp.status()) => {
                    tracing::info!(
                        status = resp.status().as_u16(),
                        waited_ms = started.elapsed().as_millis(),
                        "Platform API is ready"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    tracing::debug!(status = resp.status().as_u16(), "Platform API not ready yet");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Platform API not reachable yet");
                }
            }

            if started.elapsed() >= self.ready_timeout {
                return Err(RequestError::NotReady {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }
}

fn is_ready_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
