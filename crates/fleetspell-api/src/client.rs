// Controller RPC client
//
// Wraps `reqwest::Client` with URL construction, bearer-token handling and
// error-envelope parsing. Endpoint methods are thin wrappers over the
// request helpers at the bottom of this file.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{
    ControllerInfo, ErrorEnvelope, GrantResponse, LoginResponse, ModelStatus, UnitRunOutput,
    UserInfo,
};
use crate::transport::TransportConfig;

/// Authenticated session against one controller.
///
/// A client is "connected" between a successful [`login`](Self::login) and
/// [`logout`](Self::logout). Calls made outside that window fail with
/// [`Error::NotConnected`] without touching the network.
pub struct ControllerClient {
    http: reqwest::Client,
    base_url: Url,
    /// `host:port` used in error messages.
    endpoint: String,
    token: Mutex<Option<SecretString>>,
}

impl ControllerClient {
    /// Create an unauthenticated client for `https://<endpoint>/`.
    pub fn new(endpoint: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("https://{endpoint}/"))?;
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client` and base URL.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        let endpoint = match (base_url.host_str(), base_url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            _ => base_url.to_string(),
        };
        Self {
            http,
            base_url,
            endpoint,
            token: Mutex::new(None),
        }
    }

    /// Build a client for `endpoint` and log in.
    pub async fn connect(
        endpoint: &str,
        username: &str,
        password: &SecretString,
        transport: &TransportConfig,
    ) -> Result<(Self, LoginResponse), Error> {
        let client = Self::new(endpoint, transport)?;
        let login = client.login(username, password).await?;
        Ok((client, login))
    }

    /// The `host:port` this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The controller base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_connected(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Authenticate with username/password and store the bearer token.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, Error> {
        let url = self.url(&["login"])?;
        debug!(endpoint = %self.endpoint, username, "logging in");

        let body = json!({
            "username": username,
            "password": password.expose_secret(),
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_transport(&self.endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {}", preview(&body)),
            });
        }

        let login: LoginResponse = Self::decode(resp).await?;
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(SecretString::from(login.token.clone()));

        debug!(endpoint = %self.endpoint, "login successful");
        Ok(login)
    }

    /// End the session. The token is dropped even if the call fails.
    pub async fn logout(&self) -> Result<(), Error> {
        let Some(token) = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let url = self.url(&["logout"])?;
        debug!(endpoint = %self.endpoint, "logging out");

        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| Error::from_transport(&self.endpoint, e))?;

        Self::check(resp).await
    }

    // ── Controller ──────────────────────────────────────────────────

    pub async fn info(&self) -> Result<ControllerInfo, Error> {
        self.get(self.url(&["controller"])?).await
    }

    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        self.get(self.url(&["models"])?).await
    }

    pub async fn model_status(&self, model: &str) -> Result<ModelStatus, Error> {
        self.get(self.url(&["models", model, "status"])?).await
    }

    /// Run a shell command on a unit and wait for its output.
    pub async fn run_on_unit(
        &self,
        model: &str,
        unit: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<UnitRunOutput, Error> {
        let url = self.url(&["models", model, "units", unit, "run"])?;
        let body = json!({
            "command": command,
            "timeout": timeout.as_secs(),
        });
        self.post(url, &body).await
    }

    // ── Users ───────────────────────────────────────────────────────

    pub async fn add_user(
        &self,
        username: &str,
        display_name: Option<&str>,
        password: &SecretString,
    ) -> Result<UserInfo, Error> {
        let body = json!({
            "username": username,
            "display_name": display_name.unwrap_or(username),
            "password": password.expose_secret(),
        });
        self.post(self.url(&["users"])?, &body).await
    }

    pub async fn remove_user(&self, username: &str) -> Result<(), Error> {
        let url = self.url(&["users", username])?;
        debug!("DELETE {}", url);
        let resp = self.send(self.http.delete(url))?.await;
        Self::check(self.transport_result(resp)?).await
    }

    pub async fn enable_user(&self, username: &str) -> Result<(), Error> {
        self.post_empty(self.url(&["users", username, "enable"])?)
            .await
    }

    pub async fn disable_user(&self, username: &str) -> Result<(), Error> {
        self.post_empty(self.url(&["users", username, "disable"])?)
            .await
    }

    /// Grant a controller-level access level. Returns whether anything
    /// changed.
    pub async fn grant(&self, username: &str, acl: &str) -> Result<bool, Error> {
        let url = self.url(&["users", username, "grant"])?;
        let resp: GrantResponse = self.post(url, &json!({ "acl": acl })).await?;
        Ok(resp.changed)
    }

    // ── URL builder ─────────────────────────────────────────────────

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty().push("api").extend(segments);
        }
        Ok(url)
    }

    // ── Request helpers ─────────────────────────────────────────────

    /// Attach the bearer token, failing fast when not logged in.
    fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<impl Future<Output = Result<reqwest::Response, reqwest::Error>>, Error> {
        let guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        let token = guard.as_ref().ok_or(Error::NotConnected)?;
        Ok(builder.bearer_auth(token.expose_secret()).send())
    }

    fn transport_result(
        &self,
        resp: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, Error> {
        resp.map_err(|e| Error::from_transport(&self.endpoint, e))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.send(self.http.get(url))?.await;
        Self::decode(self.transport_result(resp)?).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self.send(self.http.post(url).json(body))?.await;
        Self::decode(self.transport_result(resp)?).await
    }

    async fn post_empty(&self, url: Url) -> Result<(), Error> {
        debug!("POST {}", url);
        let resp = self.send(self.http.post(url))?.await;
        Self::check(self.transport_result(resp)?).await
    }

    /// Map a non-2xx response to an error; 2xx bodies are ignored.
    async fn check(resp: reqwest::Response) -> Result<(), Error> {
        Self::error_for_status(resp).await.map(drop)
    }

    /// Parse a 2xx JSON body, or map the error envelope.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::error_for_status(resp).await?;
        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(len = body.len(), "response body");
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }

    async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "session expired or invalid token".into(),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Error::Api {
                status: status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => Error::Api {
                status: status.as_u16(),
                code: None,
                message: preview(&body).to_owned(),
            },
        })
    }
}

/// First 200 bytes of a body, cut on a char boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
