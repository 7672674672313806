//! Secure request client.
//!
//! Every request is signed with the session's Ed25519 key, POST/PUT bodies are
//! encrypted to the server's box key, and every 2xx response must carry a valid
//! server signature before its body is used. Server errors and network failures are
//! retried with exponential backoff. A 401 triggers one session refresh shared by
//! all concurrent callers, followed by a single replay of the original request.

use crate::config::{ClientConfig, RetryMode};
use crate::request::http::{HttpRequest, HttpTransport, Method};
use crate::request::pipeline::{Inbound, Outbound, Pipeline, ResponseBody, StageContext};
use crate::request::single_flight::SingleFlight;
use crate::secrets::{
    ensure_client_id, ensure_secrets, ensure_theme, erase_secrets, load_secrets, PLATFORM_KEY,
};
use crate::{Error, Result};
use niu_core::canonical::{encode_query, Query};
use niu_core::retry::RetryState;
use niu_platform::{KeyValueStore, Navigator, Platform};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Refresh round number and its result, shared by every caller that joined it.
type RefreshOutcome = (u64, std::result::Result<(), Arc<Error>>);

/// Per-call options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Refresh the session and replay once on 401.
    pub auto_handle_401: bool,
    /// Aborts the call, including backoff sleeps and refresh waits.
    pub cancel: Option<CancellationToken>,
    /// Per-attempt timeout overriding the configured one.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            auto_handle_401: true,
            cancel: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Surface 401 as `Error::Unauthorized` instead of refreshing.
    pub fn without_401_handling(mut self) -> Self {
        self.auto_handle_401 = false;
        self
    }

    /// Abort when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    pipeline: Pipeline,
    refresh: SingleFlight<String, RefreshOutcome>,
    refresh_round: AtomicU64,
    // Last refresh round that sent the user to the login page.
    redirected_round: AtomicU64,
}

/// Secure request client.
///
/// Cheap to clone; clones share the pipeline and the refresh coordination.
///
/// # Example
///
/// ```no_run
/// use niu_platform::mock::{MemoryStore, RecordingNavigator};
/// use niu_transport::config::ClientConfig;
/// use niu_transport::request::{ReqwestTransport, SecureClient};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> niu_transport::Result<()> {
/// let config = ClientConfig::from_env()?;
/// let transport = ReqwestTransport::new(config.request_timeout)?;
/// let client = SecureClient::new(
///     config,
///     Arc::new(transport),
///     Arc::new(MemoryStore::new()),
///     Arc::new(RecordingNavigator::new()),
/// )?;
/// client.init()?;
///
/// let me = client.get("/v1/user/me", None).await?;
/// println!("{:?}", me);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SecureClient {
    inner: Arc<Inner>,
}

impl SecureClient {
    /// Build a client over the host's transport, store and navigator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `config` does not validate.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                navigator,
                pipeline: Pipeline::secure(),
                refresh: SingleFlight::new(),
                refresh_round: AtomicU64::new(0),
                redirected_round: AtomicU64::new(0),
            }),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Prepare storage: session secrets, client id, platform id and default theme.
    pub fn init(&self) -> Result<()> {
        let store = self.inner.store.as_ref();
        let secrets = ensure_secrets(store, &self.inner.config)?;
        let client_id = ensure_client_id(store)?;
        store.set(PLATFORM_KEY, &self.inner.config.platform.id().to_string())?;
        ensure_theme(store)?;
        info!(
            client_id = %client_id,
            platform = %self.inner.config.platform,
            session_len = secrets.session_id.len(),
            "secure client initialized"
        );
        Ok(())
    }

    /// End the session.
    ///
    /// Posts to the logout endpoint, then erases the secret bundles and the bearer
    /// token whatever the server answered. With `redirect`, navigates to the login
    /// page carrying the current location. Channel owners close their broker
    /// separately.
    ///
    /// # Errors
    ///
    /// Returns the logout request's error after local state is cleared.
    pub async fn logout(&self, redirect: bool) -> Result<()> {
        let outbound = Outbound::new(Method::Post, self.inner.config.logout_path.clone(), "");
        let outcome = self.dispatch(&outbound, None).await;

        let store = self.inner.store.as_ref();
        erase_secrets(store, &self.inner.config)?;
        store.remove(&self.inner.config.token_name)?;
        info!("logged out");

        if redirect {
            self.redirect_to_login();
        }
        outcome.map(|_| ())
    }

    /// Send a request through the secure pipeline.
    ///
    /// # Errors
    ///
    /// See [`Error`]; 4xx other than 401 surface as `Error::Status`, 5xx that persist
    /// through every retry as `Error::Server`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&Query>,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ResponseBody> {
        let query = match query {
            Some(query) => encode_query(query)?,
            None => String::new(),
        };
        let mut outbound = Outbound::new(method, path, query);
        outbound.json = body;

        let call = self.call(outbound, &options);
        cancellable(options.cancel.as_ref(), call).await
    }

    /// GET `path`.
    pub async fn get(&self, path: &str, query: Option<&Query>) -> Result<ResponseBody> {
        self.send(Method::Get, path, query, None, RequestOptions::default())
            .await
    }

    /// POST `body` to `path`.
    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<ResponseBody> {
        self.send(Method::Post, path, None, body, RequestOptions::default())
            .await
    }

    /// PUT `body` to `path`.
    pub async fn put(&self, path: &str, body: Option<Value>) -> Result<ResponseBody> {
        self.send(Method::Put, path, None, body, RequestOptions::default())
            .await
    }

    /// DELETE `path`.
    pub async fn delete(&self, path: &str, query: Option<&Query>) -> Result<ResponseBody> {
        self.send(Method::Delete, path, query, None, RequestOptions::default())
            .await
    }

    /// GET `path` and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&Query>,
    ) -> Result<T> {
        self.get(path, query).await?.into_json()
    }

    /// POST `body` as JSON to `path` and deserialize the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| Error::Protocol(niu_core::Error::Marshal(e.to_string())))?;
        self.post(path, Some(body)).await?.into_json()
    }

    async fn call(&self, outbound: Outbound, options: &RequestOptions) -> Result<ResponseBody> {
        match self.dispatch(&outbound, options.timeout).await {
            Ok((_, body)) => Ok(body),
            Err(Error::Unauthorized) if options.auto_handle_401 => {
                self.recover_unauthorized(&outbound, options.timeout).await
            }
            Err(e) => Err(e),
        }
    }

    async fn recover_unauthorized(
        &self,
        outbound: &Outbound,
        timeout: Option<Duration>,
    ) -> Result<ResponseBody> {
        debug!(path = %outbound.path, "unauthorized, refreshing session");

        let (round, refreshed) = self.refresh_session().await;
        if refreshed.is_err() {
            self.redirect_once(round);
            return Err(Error::RefreshFailed);
        }

        match self.dispatch(outbound, timeout).await {
            Ok((_, body)) => Ok(body),
            Err(Error::Unauthorized) => {
                warn!(path = %outbound.path, "still unauthorized after refresh");
                self.redirect_once(round);
                Err(Error::RefreshFailed)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self) -> RefreshOutcome {
        let client = self.clone();
        let path = self.inner.config.refresh_path.clone();

        self.inner
            .refresh
            .run(path.clone(), move || async move {
                let round = client.inner.refresh_round.fetch_add(1, Ordering::SeqCst) + 1;
                let outbound = Outbound::new(Method::Post, path, "");
                let outcome = match client.dispatch(&outbound, None).await {
                    Ok((200, _)) => {
                        info!(round, "session refreshed");
                        Ok(())
                    }
                    Ok((status, _)) => Err(Arc::new(Error::Status {
                        status,
                        body: String::new(),
                    })),
                    Err(e) => Err(Arc::new(e)),
                };
                if let Err(cause) = &outcome {
                    warn!(round, error = %cause, "session refresh failed");
                }
                (round, outcome)
            })
            .await
    }

    /// One logical request: outbound stages, transport with retry, inbound stages.
    async fn dispatch(
        &self,
        request: &Outbound,
        timeout: Option<Duration>,
    ) -> Result<(u16, ResponseBody)> {
        let inner = &self.inner;
        let timeout = timeout.unwrap_or(inner.config.request_timeout);
        let may_retry = match inner.config.retry_mode {
            RetryMode::All => true,
            RetryMode::IdempotentOnly => request.method.is_idempotent(),
        };
        let mut retry = RetryState::new(inner.config.retry);

        loop {
            let store = inner.store.as_ref();
            let secrets = load_secrets(store, &inner.config)?.ok_or(Error::SecretsUnavailable)?;
            let client_id = ensure_client_id(store)?;
            let token = match inner.config.platform {
                Platform::Browser => None,
                _ => store.get(&inner.config.token_name)?,
            };
            let ctx = StageContext {
                config: &inner.config,
                secrets: &secrets,
                client_id: &client_id,
                token: token.as_deref(),
            };

            let mut outbound = request.clone();
            inner.pipeline.prepare(&mut outbound, &ctx)?;
            let http = HttpRequest {
                method: outbound.method,
                url: self.url_for(&outbound),
                headers: outbound.headers.clone(),
                body: outbound.body.clone(),
            };

            debug!(method = %http.method, path = %outbound.path, attempt = retry.attempt(), "sending request");
            let result = tokio::time::timeout(timeout, inner.transport.execute(http))
                .await
                .unwrap_or_else(|_| Err(Error::Network(format!("timed out after {:?}", timeout))));

            let failure = match result {
                Ok(response) if response.is_success() => {
                    let status = response.status;
                    let inbound = Inbound {
                        status,
                        headers: response.headers,
                        body: response.body,
                        decrypted: false,
                    };
                    let body = inner.pipeline.receive(inbound, &outbound, &ctx)?;
                    return Ok((status, body));
                }
                Ok(response) if response.status == 401 => return Err(Error::Unauthorized),
                Ok(response) if response.status >= 500 => Error::Server {
                    status: response.status,
                },
                Ok(response) => {
                    return Err(Error::Status {
                        status: response.status,
                        body: response.body,
                    })
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            match retry.next().filter(|_| may_retry) {
                Some(delay) => {
                    warn!(path = %outbound.path, error = %failure, ?delay, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(failure),
            }
        }
    }

    fn url_for(&self, outbound: &Outbound) -> String {
        let base = self.inner.config.api_base_url.trim_end_matches('/');
        if outbound.query.is_empty() {
            format!("{}{}", base, outbound.path)
        } else {
            format!("{}{}?{}", base, outbound.path, outbound.query)
        }
    }

    /// Redirect to login at most once per refresh round.
    fn redirect_once(&self, round: u64) {
        if self.inner.redirected_round.fetch_max(round, Ordering::SeqCst) < round {
            self.redirect_to_login();
        }
    }

    fn redirect_to_login(&self) {
        let login = &self.inner.config.login_path;
        let current = self.inner.navigator.current_location();
        if let Some(target) = login_redirect(login, &current) {
            if let Err(e) = self.inner.navigator.replace(&target) {
                warn!(error = %e, "login redirect refused");
            }
        }
    }
}

/// Login location for a session that could not be recovered from `current`.
///
/// `None` when already on the login page; no `redirect` parameter from `/`.
pub fn login_redirect(login: &str, current: &str) -> Option<String> {
    if on_page(login, current) {
        return None;
    }
    if current.is_empty() || current == "/" {
        return Some(login.to_string());
    }
    Some(format!("{}?redirect={}", login, urlencoding::encode(current)))
}

/// Whether `current` is `page` itself, ignoring query, fragment and subpaths.
fn on_page(page: &str, current: &str) -> bool {
    let page = page.trim_end_matches('/');
    match current.strip_prefix(page) {
        Some(rest) => rest.is_empty() || rest.starts_with(['?', '#', '/']),
        None => false,
    }
}

async fn cancellable<T>(
    token: Option<&CancellationToken>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = call => result,
        },
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_redirect() {
        assert_eq!(
            login_redirect("/login", "/chat?room=1").as_deref(),
            Some("/login?redirect=%2Fchat%3Froom%3D1")
        );
        assert_eq!(login_redirect("/login", "/").as_deref(), Some("/login"));
        assert_eq!(login_redirect("/login", "/login?redirect=%2Fx"), None);
        assert_eq!(login_redirect("/login", "/login"), None);
        assert_eq!(login_redirect("/login", "/login#top"), None);
        assert_eq!(login_redirect("/login", "/login/otp"), None);
        assert_eq!(
            login_redirect("/login", "/loginx").as_deref(),
            Some("/login?redirect=%2Floginx")
        );
        assert_eq!(
            login_redirect("/login", "/login-help?q=1").as_deref(),
            Some("/login?redirect=%2Flogin-help%3Fq%3D1")
        );
    }

    #[test]
    fn test_default_options() {
        let options = RequestOptions::default();
        assert!(options.auto_handle_401);
        assert!(!options.without_401_handling().auto_handle_401);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = cancellable(Some(&token), std::future::pending()).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        let result = cancellable(None, async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }
}
