pub mod classify;
pub mod links;
pub mod observer;
pub mod paginate;
pub mod quota;
pub mod retry;

use crate::cancel::CancelToken;
use crate::config::{Config, ConfigError};
use crate::types::RequestSpec;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

pub use classify::{classify, diagnose, ApiError, Diagnosis, ErrorKind, FieldError, Outcome};
pub use links::{LinkTarget, PaginationLinks};
pub use observer::{NoopObserver, Observer, RetryEvent};
pub use paginate::Page;
pub use quota::{QuotaHeaders, QuotaState, RateLimitGovernor};
pub use retry::{RetryAction, RetryContext, RetryPolicy};

use classify::TransportFailure;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Successful response of one logical call.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// Decoded JSON body; `Null` for empty bodies (204 and friends).
    pub body: Value,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub links: PaginationLinks,
    /// Quota of the pool the call was charged to, as known after this response.
    pub quota: Option<QuotaState>,
}

impl ResponseEnvelope {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

pub fn build_client(cfg: &Config) -> Result<Client, ConfigError> {
    let mut default_headers = HeaderMap::new();
    let ua = HeaderValue::from_str(&cfg.user_agent)
        .map_err(|_| ConfigError::Client(format!("invalid user agent {:?}", cfg.user_agent)))?;
    default_headers.insert(USER_AGENT, ua);
    // Timeouts are applied per attempt on each request, not client-wide.
    Client::builder()
        .default_headers(default_headers)
        .use_rustls_tls()
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

fn auth_header(token: &str) -> Result<HeaderValue, ConfigError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ConfigError::InvalidToken)?;
    value.set_sensitive(true);
    Ok(value)
}

/// Request executor: authenticates, throttles on quota, retries per policy.
pub struct RestClient {
    client: Client,
    config: Config,
    base: Url,
    auth: HeaderValue,
    governor: Arc<RateLimitGovernor>,
    policy: RetryPolicy,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base", &self.base.as_str())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_governor(config, Arc::new(RateLimitGovernor::new()))
    }

    /// Build an executor sharing `governor` with other executors that use the
    /// same credential against the same API.
    pub fn with_governor(
        config: Config,
        governor: Arc<RateLimitGovernor>,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(config.api_url.trim_end_matches('/'))
            .map_err(|_| ConfigError::InvalidUrl(config.api_url.clone()))?;
        Ok(Self {
            client: build_client(&config)?,
            auth: auth_header(&config.token)?,
            policy: config.retry_policy(),
            base,
            config,
            governor,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn governor(&self) -> &Arc<RateLimitGovernor> {
        &self.governor
    }

    /// Read-only view of a pool's quota.
    pub fn quota(&self, pool: &str) -> Option<QuotaState> {
        self.governor.quota(pool)
    }

    fn resolve_url(&self, spec: &RequestSpec) -> Result<Url, ApiError> {
        let mut url = if spec.path.starts_with("http://") || spec.path.starts_with("https://") {
            let url = Url::parse(&spec.path).map_err(|e| {
                ApiError::local(ErrorKind::Unknown, &spec.path, format!("invalid URL: {}", e))
            })?;
            // never send the credential to another host
            if url.origin() != self.base.origin() {
                return Err(ApiError::local(
                    ErrorKind::Unknown,
                    &spec.path,
                    format!("refusing to follow link outside {}", self.base),
                ));
            }
            url
        } else {
            let joined = format!(
                "{}/{}",
                self.base.as_str().trim_end_matches('/'),
                spec.path.trim_start_matches('/')
            );
            Url::parse(&joined).map_err(|e| {
                ApiError::local(ErrorKind::Unknown, &spec.path, format!("invalid path: {}", e))
            })?
        };
        if !spec.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &spec.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn build_request(&self, spec: &RequestSpec, url: &Url) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(spec.method.as_reqwest(), url.clone())
            .header(AUTHORIZATION, self.auth.clone())
            .header("X-GitHub-Api-Version", &self.config.api_version)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
            .timeout(spec.timeout.unwrap_or_else(|| self.config.timeout()));
        if let Some(body) = spec.body.as_ref().filter(|_| spec.method.has_body()) {
            req = req.json(body);
        }
        req
    }

    /// Record quota headers under the request's pool, mirrored under the
    /// resource name the server reports when that differs.
    fn observe_quota(&self, pool: &str, headers: &HeaderMap) {
        let quota = QuotaHeaders::from_headers(headers);
        self.governor.observe(pool, &quota);
        if let Some(resource) = quota.resource.as_deref().filter(|r| *r != pool) {
            self.governor.observe(resource, &quota);
        }
    }

    /// Suspend while the pool's quota is known to be spent.
    async fn wait_for_quota(
        &self,
        spec: &RequestSpec,
        ctx: &mut RetryContext,
        cancel: &CancelToken,
    ) -> Result<(), ApiError> {
        let Some(wait) = self.governor.must_wait(&spec.pool) else {
            return Ok(());
        };
        if ctx.rate_limit_waited >= self.policy.max_rate_limit_wait {
            let reset_at = self
                .governor
                .quota(&spec.pool)
                .map(|q| q.reset_at_epoch_seconds);
            return Err(ApiError::Failed {
                kind: ErrorKind::RateLimited,
                path: spec.path.clone(),
                status: None,
                message: format!("quota for pool {} exhausted", spec.pool),
                field_errors: Vec::new(),
                reset_at,
                attempts: ctx.attempt,
            });
        }
        let wait = wait.min(self.policy.max_rate_limit_wait);
        info!(
            "quota for pool {} exhausted, waiting {:?} before {}",
            spec.pool, wait, spec.path
        );
        self.observer.on_rate_limit_wait(&spec.pool, wait);
        ctx.record_rate_limit_wait(wait);
        cancel
            .sleep(wait)
            .await
            .map_err(|_| cancelled(&spec.path))
    }

    fn rate_limit_hint(&self, pool: &str, diagnosis: &Diagnosis) -> Option<Duration> {
        if diagnosis.kind != ErrorKind::RateLimited {
            return None;
        }
        diagnosis
            .retry_after
            .or_else(|| {
                diagnosis
                    .reset_at
                    .and_then(|reset| quota::until_reset(reset, quota::now_millis()))
            })
            .or_else(|| self.governor.must_wait(pool))
    }

    /// Execute one logical call, retrying transient failures per policy.
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        cancel: &CancelToken,
    ) -> Result<ResponseEnvelope, ApiError> {
        let url = self.resolve_url(spec)?;
        let path = spec.path.as_str();
        let started = Instant::now();
        let mut ctx = RetryContext::new();

        loop {
            self.wait_for_quota(spec, &mut ctx, cancel).await?;
            self.governor.reserve(&spec.pool);
            ctx.attempt += 1;
            self.observer.on_attempt(path, ctx.attempt);
            debug!("{:?} {} attempt {}", spec.method, url, ctx.attempt);

            let sent = cancel
                .guard(self.build_request(spec, &url).send())
                .await
                .map_err(|_| cancelled(path))?;

            let pool = spec.pool.as_str();
            let diagnosis = match sent {
                Ok(res) => {
                    let status = res.status();
                    let headers = res.headers().clone();
                    self.observe_quota(pool, &headers);
                    let text = cancel
                        .guard(res.text())
                        .await
                        .map_err(|_| cancelled(path))?;
                    match text {
                        Ok(body) if status.is_success() => {
                            return self.envelope(path, pool, status, headers, &body, ctx.attempt);
                        }
                        Ok(body) => {
                            let outcome = Outcome::Response {
                                status,
                                headers: &headers,
                                body: &body,
                            };
                            diagnose(&outcome)
                        }
                        Err(e) => transport_diagnosis(&e),
                    }
                }
                Err(e) => transport_diagnosis(&e),
            };

            ctx.record_failure(diagnosis.kind, started.elapsed());
            let hint = self.rate_limit_hint(pool, &diagnosis);
            match self.policy.next_action(diagnosis.kind, &ctx, hint) {
                RetryAction::Stop => {
                    debug!(
                        "{} failed with {} after {} attempt(s)",
                        path, diagnosis.kind, ctx.attempt
                    );
                    return Err(ApiError::from_diagnosis(path, diagnosis, ctx.attempt));
                }
                RetryAction::RetryAfter(delay) => {
                    warn!(
                        "{:?} {} failed ({}: {}), retrying in {:?}",
                        spec.method, path, diagnosis.kind, diagnosis.message, delay
                    );
                    self.observer.on_retry(&RetryEvent {
                        path: path.to_string(),
                        kind: diagnosis.kind,
                        attempt: ctx.attempt,
                        delay,
                    });
                    if diagnosis.kind == ErrorKind::RateLimited && hint.is_some() {
                        info!("rate limited on pool {}, waiting {:?}", pool, delay);
                        self.observer.on_rate_limit_wait(pool, delay);
                        ctx.record_rate_limit_wait(delay);
                    }
                    cancel.sleep(delay).await.map_err(|_| cancelled(path))?;
                }
            }
        }
    }

    fn envelope(
        &self,
        path: &str,
        pool: &str,
        status: StatusCode,
        headers: HeaderMap,
        body: &str,
        attempts: u32,
    ) -> Result<ResponseEnvelope, ApiError> {
        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body).map_err(|e| ApiError::Failed {
                kind: ErrorKind::Unknown,
                path: path.to_string(),
                status: Some(status.as_u16()),
                message: format!("malformed JSON body: {}", e),
                field_errors: Vec::new(),
                reset_at: None,
                attempts,
            })?
        };
        Ok(ResponseEnvelope {
            body,
            status,
            links: PaginationLinks::from_headers(&headers),
            quota: self.governor.quota(pool),
            headers,
        })
    }
}

fn cancelled(path: &str) -> ApiError {
    ApiError::Cancelled {
        path: path.to_string(),
    }
}

fn transport_diagnosis(err: &reqwest::Error) -> Diagnosis {
    let failure = TransportFailure::from_reqwest(err);
    let mut d = diagnose(&Outcome::Transport(failure));
    d.message = format!("{}: {}", d.message, err);
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageCursor;

    fn client() -> RestClient {
        RestClient::new(Config::new("t", "https://api.example.test/")).unwrap()
    }

    #[test]
    fn relative_paths_join_base_and_query() {
        let c = client();
        let spec = RequestSpec::get("/repos/o/r/issues").query("state", "all");
        let url = c.resolve_url(&spec).unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/repos/o/r/issues?state=all");
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let c = RestClient::new(Config::new("t", "https://ghe.example.test/api/v3")).unwrap();
        let url = c.resolve_url(&RequestSpec::get("user")).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.test/api/v3/user");
    }

    #[test]
    fn same_origin_next_links_are_followed() {
        let c = client();
        let spec = RequestSpec::get("/r").for_page(&PageCursor {
            page: 2,
            per_page: 30,
            next_url: Some("https://api.example.test/repositories/9/r?page=2".into()),
        });
        let url = c.resolve_url(&spec).unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/repositories/9/r?page=2");
    }

    #[test]
    fn foreign_links_are_refused() {
        let c = client();
        let err = c
            .resolve_url(&RequestSpec::get("https://evil.example.test/r?page=2"))
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unknown));
    }

    #[test]
    fn bad_configuration_is_rejected() {
        assert_eq!(
            RestClient::new(Config::new("t", "not a url")).unwrap_err(),
            ConfigError::InvalidUrl("not a url".into())
        );
        assert_eq!(
            RestClient::new(Config::new("bad\ntoken", "https://api.example.test")).unwrap_err(),
            ConfigError::InvalidToken
        );
    }

    #[test]
    fn envelope_decodes_empty_body_as_null() {
        let c = client();
        let env = c
            .envelope("/x", "core", StatusCode::NO_CONTENT, HeaderMap::new(), "", 1)
            .unwrap();
        assert_eq!(env.body, Value::Null);
        let err = c
            .envelope("/x", "core", StatusCode::OK, HeaderMap::new(), "{oops", 1)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unknown));
        assert_eq!(err.status(), Some(200));
    }
}
