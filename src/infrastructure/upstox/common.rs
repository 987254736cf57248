use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::Clock;
use crate::infrastructure::upstox::guard::TransportGuard;
use crate::infrastructure::upstox::session::SessionState;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Broker calls must never block the engine loop past this budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Retries the middleware spends on transient transport errors before the
/// failure surfaces to the guard.
const TRANSIENT_RETRIES: u32 = 3;
/// Consecutive transport failures that open the guard.
const GUARD_TRIP_AFTER: u32 = 5;
/// How long the guard suppresses calls before probing again.
const GUARD_COOL_OFF: Duration = Duration::from_secs(60);

/// HTTP client for the gateway: 10 s request budget, exponential-backoff
/// retry on transient errors. Failures that exhaust the retries are
/// accounted by the [`TransportGuard`].
fn broker_http_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(TRANSIENT_RETRIES);
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| Client::new());
    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// Upstox REST gateway. All calls run behind the transport guard and the
/// shared 10 s request timeout.
pub struct UpstoxGateway {
    pub(super) client: ClientWithMiddleware,
    pub(super) base_url: String,
    pub(super) api_key: String,
    pub(super) api_secret: String,
    pub(super) refresh_token: Option<String>,
    pub(super) session: RwLock<SessionState>,
    pub(super) guard: TransportGuard,
    pub(super) clock: Arc<dyn Clock>,
}

impl UpstoxGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        refresh_token: Option<String>,
        access_token: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = match access_token {
            Some(token) => SessionState::authenticated(token, None),
            None => SessionState::default(),
        };
        Self {
            client: broker_http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            refresh_token,
            session: RwLock::new(session),
            guard: TransportGuard::new(GUARD_TRIP_AFTER, GUARD_COOL_OFF),
            clock,
        }
    }

    pub(super) async fn bearer(&self) -> EngineResult<String> {
        let session = self.session.read().await;
        if !session.is_valid(self.clock.now()) {
            return Err(EngineError::Unauthenticated);
        }
        Ok(format!(
            "Bearer {}",
            session.access_token.as_deref().unwrap_or_default()
        ))
    }

    /// Endpoint URL for `path` with query parameters. Instrument keys
    /// carry `|` and spaces, so both path and query go through the URL
    /// encoder instead of string concatenation.
    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> EngineResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| EngineError::bad_request(format!("invalid broker url: {}", e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn map_transport_error(err: reqwest_middleware::Error) -> EngineError {
        let is_timeout = match &err {
            reqwest_middleware::Error::Reqwest(e) => e.is_timeout(),
            reqwest_middleware::Error::Middleware(_) => false,
        };
        if is_timeout {
            EngineError::BrokerTimeout {
                millis: REQUEST_TIMEOUT.as_millis() as u64,
            }
        } else {
            EngineError::broker(err.to_string())
        }
    }

    fn map_status_error(status: reqwest::StatusCode, body: &str) -> EngineError {
        match status.as_u16() {
            401 | 403 => EngineError::Unauthenticated,
            400 => EngineError::bad_request(body.to_string()),
            404 => EngineError::not_found(body.to_string()),
            _ => EngineError::broker(format!("HTTP {}: {}", status, body)),
        }
    }

    async fn execute_json(
        &self,
        request: reqwest_middleware::RequestBuilder,
    ) -> EngineResult<Value> {
        self.guard.admit().await?;

        let outcome = async {
            let response = request.send().await.map_err(Self::map_transport_error)?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| EngineError::broker(e.to_string()))?;
            if !status.is_success() {
                return Err(Self::map_status_error(status, &body));
            }
            serde_json::from_str::<Value>(&body)
                .map_err(|e| EngineError::broker(format!("malformed broker response: {}", e)))
        }
        .await;

        self.guard.record(outcome.as_ref().err()).await;
        outcome
    }

    /// GET `{base}{path}?{params}` with the session bearer, returning the
    /// `data` member of the standard response envelope.
    pub(super) async fn get_data(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> EngineResult<Value> {
        let auth = self.bearer().await?;
        let url = self.endpoint(path, params)?;
        debug!("UpstoxGateway: GET {}", path);
        let request = self
            .client
            .get(url.as_str())
            .header("Authorization", auth)
            .header("Accept", "application/json");
        let envelope = self.execute_json(request).await?;
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    /// POST JSON with the session bearer, returning the `data` member.
    pub(super) async fn post_data(&self, path: &str, body: Value) -> EngineResult<Value> {
        let auth = self.bearer().await?;
        let url = self.endpoint(path, &[])?;
        debug!("UpstoxGateway: POST {}", path);
        let request = self
            .client
            .post(url.as_str())
            .header("Authorization", auth)
            .header("Accept", "application/json")
            .json(&body);
        let envelope = self.execute_json(request).await?;
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    /// DELETE with the session bearer, returning the `data` member.
    pub(super) async fn delete_data(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> EngineResult<Value> {
        let auth = self.bearer().await?;
        let url = self.endpoint(path, params)?;
        debug!("UpstoxGateway: DELETE {}", path);
        let request = self
            .client
            .delete(url.as_str())
            .header("Authorization", auth)
            .header("Accept", "application/json");
        let envelope = self.execute_json(request).await?;
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Unauthenticated POST used by the token-refresh flow.
    pub(super) async fn post_unauthenticated(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> EngineResult<Value> {
        let url = self.endpoint(path, &[])?;
        let request = self
            .client
            .post(url.as_str())
            .header("Accept", "application/json")
            .form(form);
        self.execute_json(request).await
    }
}
