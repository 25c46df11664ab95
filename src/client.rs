use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{Method, Response, Uri};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{Instrument, debug, info_span, warn};

use crate::body::{AttemptBody, ResBody, build_http_request, empty, read_body_prefix};
use crate::buffer_pool::{BufferPool, BufferPoolStats};
use crate::config::{RequestConfig, RequestOption};
use crate::context::Context;
use crate::error::{AttemptError, Error, MAX_ERROR_BODY_BYTES, TransportError};
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::middleware::MiddlewareChain;
use crate::response::HttpResponse;
use crate::transport::{
    SharedTransport, TlsBackend, TlsRootStore, Transport, TransportSettings, TransportStore,
};
use crate::util::{
    is_redirect_status, parse_request_uri, redact_uri_for_logs, redirect_method, redirect_target,
    same_origin, sanitize_headers_for_redirect,
};

const DEFAULT_CLIENT_NAME: &str = "reqflow";
const MAX_REDIRECTS: usize = 10;

pub struct ClientBuilder {
    client_name: String,
    settings: TransportSettings,
    transport: Option<Arc<dyn Transport>>,
    transport_store: Option<Arc<TransportStore>>,
    buffer_pool: Option<BufferPool>,
    default_options: Vec<RequestOption>,
    metrics_enabled: bool,
}

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            settings: TransportSettings::default(),
            transport: None,
            transport_store: None,
            buffer_pool: None,
            default_options: Vec::new(),
            metrics_enabled: false,
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn transport_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn max_idle_conns(mut self, count: usize) -> Self {
        self.settings.max_idle_conns = count;
        self
    }

    pub fn max_idle_conns_per_host(mut self, count: usize) -> Self {
        self.settings.max_idle_conns_per_host = count;
        self
    }

    /// `0` leaves connections per host unbounded.
    pub fn max_conns_per_host(mut self, count: usize) -> Self {
        self.settings.max_conns_per_host = (count > 0).then_some(count);
        self
    }

    pub fn idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.settings.idle_conn_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.settings.http2_only = enabled;
        self
    }

    pub fn tls_backend(mut self, backend: TlsBackend) -> Self {
        self.settings.tls_backend = backend;
        self
    }

    pub fn tls_root_store(mut self, root_store: TlsRootStore) -> Self {
        self.settings.tls_root_store = root_store;
        self
    }

    /// Sends through `transport` instead of the built-in hyper transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares an existing store, and with it the connection pool, between clients.
    ///
    /// Takes precedence over [`transport`](Self::transport) and the settings knobs.
    pub fn transport_store(mut self, store: Arc<TransportStore>) -> Self {
        self.transport_store = Some(store);
        self
    }

    pub fn buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Applied before the options of every call.
    pub fn default_option(mut self, option: RequestOption) -> Self {
        self.default_options.push(option);
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn try_build(self) -> crate::Result<Client> {
        let store = match self.transport_store {
            Some(store) => store,
            None => {
                let shared = match self.transport {
                    Some(transport) => SharedTransport::new(self.settings, transport),
                    None => SharedTransport::hyper(self.settings)?,
                };
                Arc::new(TransportStore::new(shared))
            }
        };
        let metrics = if self.metrics_enabled {
            ClientMetrics::enabled()
        } else {
            ClientMetrics::disabled()
        };

        Ok(Client {
            client_name: self.client_name,
            store,
            buffer_pool: self.buffer_pool.unwrap_or_default(),
            default_options: self.default_options.into(),
            metrics,
        })
    }

    #[track_caller]
    pub fn build(self) -> Client {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build reqflow client: {error}; use try_build() to handle configuration errors")
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientBuilder")
            .field("client_name", &self.client_name)
            .field("settings", &self.settings)
            .field("custom_transport", &self.transport.is_some())
            .field("default_options", &self.default_options)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish_non_exhaustive()
    }
}

/// Retrying HTTP client over a shared, tunable transport.
///
/// Cloning is cheap; clones share the transport store, the buffer pool and
/// the metrics.
#[derive(Clone)]
pub struct Client {
    client_name: String,
    store: Arc<TransportStore>,
    buffer_pool: BufferPool,
    default_options: Arc<[RequestOption]>,
    metrics: ClientMetrics,
}

enum AttemptOutcome {
    /// The response and the redacted URL it was finally served from.
    Success(Response<ResBody>, String),
    Fatal(Error),
    Retryable(AttemptError),
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn transport_store(&self) -> &Arc<TransportStore> {
        &self.store
    }

    pub fn buffer_pool_stats(&self) -> BufferPoolStats {
        self.buffer_pool.stats()
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Sends a request, retrying retryable failures with backoff.
    ///
    /// Redirects are followed inside each attempt, up to ten hops. `GET` and
    /// `HEAD` are retried on any non-2xx, non-4xx outcome; other methods only
    /// with [`RequestOption::ForceRetry`]. A 4xx response is returned as an
    /// error immediately. On success the response body is handed back unread.
    pub async fn execute<I>(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        let config = RequestConfig::from_options(self.default_options.iter().cloned().chain(options))?;
        let uri = parse_request_uri(url)?;
        self.store.apply(config.tunings())?;

        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let started = Instant::now();
        let redacted_url = redact_uri_for_logs(url);
        let result = self
            .run(ctx, &config, method.clone(), &uri, &redacted_url, body.as_ref())
            .await;
        match &result {
            Ok(_) => self.metrics.record_request_succeeded(started.elapsed()),
            Err(error) => {
                warn!(
                    client = %self.client_name,
                    method = %method,
                    uri = %redacted_url,
                    error_code = error.code().as_str(),
                    error = %error,
                    "request failed"
                );
                self.metrics.record_request_failed(error, started.elapsed());
            }
        }
        result
    }

    async fn run(
        &self,
        ctx: &Context,
        config: &RequestConfig,
        method: Method,
        uri: &Uri,
        redacted_url: &str,
        body: Option<&Bytes>,
    ) -> crate::Result<HttpResponse> {
        let max_attempts = config.max_attempts();
        let retry_permitted = config.retry_permitted(&method);
        let mut attempt = 0;

        loop {
            if let Some(error) = ctx.err() {
                return Err(error);
            }

            let span = info_span!(
                "reqflow.request",
                client = %self.client_name,
                method = %method,
                uri = %redacted_url,
                attempt = attempt + 1,
                max_attempts = max_attempts
            );
            let outcome = self
                .run_attempt(ctx, config, &method, uri, redacted_url, body)
                .instrument(span.clone())
                .await;
            let error = match outcome {
                AttemptOutcome::Success(response, final_url) => {
                    return Ok(HttpResponse::new(method, final_url, response));
                }
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::Retryable(error) => error,
            };

            attempt += 1;
            if !retry_permitted || attempt >= max_attempts {
                return Err(Error::Attempt(error));
            }

            let delay = config.backoff().compute(attempt - 1);
            span.in_scope(|| {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request"
                );
            });
            self.metrics.record_retry();
            tokio::select! {
                biased;
                error = ctx.done() => return Err(error),
                () = sleep(delay) => {}
            }
        }
    }

    async fn run_attempt(
        &self,
        ctx: &Context,
        config: &RequestConfig,
        method: &Method,
        uri: &Uri,
        redacted_url: &str,
        body: Option<&Bytes>,
    ) -> AttemptOutcome {
        self.metrics.record_attempt();
        let mut attempt_body = AttemptBody::prepare(&self.buffer_pool, body);
        let transport = self.store.get();
        let send_timeout = transport.settings().timeout;
        let chain = MiddlewareChain::new(transport, config.middlewares().to_vec());
        let started = Instant::now();
        let deadline = started + send_timeout;

        let failed_send = |source: TransportError| {
            self.metrics.record_transport_error(source.kind().as_str());
            debug!(
                kind = source.kind().as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "send failed"
            );
            AttemptOutcome::Retryable(AttemptError::new(
                0,
                method.clone(),
                redacted_url,
                Bytes::new(),
                Some(source),
            ))
        };

        let mut hop_method = method.clone();
        let mut hop_uri = uri.clone();
        let mut headers = config.headers().clone();
        let mut send_body = true;
        let mut redirects = 0;
        let response = loop {
            let request_body = if send_body {
                attempt_body.request_body()
            } else {
                empty()
            };
            let request =
                match build_http_request(hop_method.clone(), hop_uri.clone(), &headers, request_body)
                {
                    Ok(request) => request,
                    Err(error) => return AttemptOutcome::Fatal(error),
                };
            debug!(
                pooled_body = attempt_body.is_pooled() && send_body,
                redirects, "sending request"
            );

            let sent = tokio::select! {
                biased;
                error = ctx.done() => return AttemptOutcome::Fatal(error),
                sent = timeout_at(deadline, chain.send(request)) => sent,
            };
            let response = match sent {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => return failed_send(source),
                Err(_) => return failed_send(TransportError::timeout(send_timeout)),
            };

            let status = response.status();
            if !is_redirect_status(status) {
                break response;
            }
            let Some(target) = redirect_target(&hop_uri, response.headers()) else {
                break response;
            };
            if redirects >= MAX_REDIRECTS {
                return failed_send(TransportError::other(format!(
                    "stopped after {MAX_REDIRECTS} redirects"
                )));
            }

            redirects += 1;
            let next_method = redirect_method(&hop_method, status);
            let changed_to_get = next_method != hop_method;
            sanitize_headers_for_redirect(
                &mut headers,
                changed_to_get,
                same_origin(&hop_uri, &target),
            );
            if changed_to_get {
                send_body = false;
            }
            debug!(
                status = status.as_u16(),
                location = %redact_uri_for_logs(&target.to_string()),
                redirects,
                "following redirect"
            );
            drop(response);
            hop_method = next_method;
            hop_uri = target;
        };

        let status = response.status();
        self.metrics.record_status(status.as_u16());
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response received"
        );
        if status.is_success() {
            let final_url = if redirects == 0 {
                redacted_url.to_owned()
            } else {
                redact_uri_for_logs(&hop_uri.to_string())
            };
            return AttemptOutcome::Success(response, final_url);
        }

        let mut diagnostic_body = BytesMut::new();
        let read = tokio::select! {
            biased;
            error = ctx.done() => return AttemptOutcome::Fatal(error),
            read = timeout_at(
                deadline,
                read_body_prefix(response.into_body(), &mut diagnostic_body, MAX_ERROR_BODY_BYTES),
            ) => read,
        };
        let source = match read {
            Ok(()) => None,
            Err(_) => {
                let source = TransportError::timeout(send_timeout);
                self.metrics.record_transport_error(source.kind().as_str());
                Some(source)
            }
        };
        let error = AttemptError::new(
            status.as_u16(),
            method.clone(),
            redacted_url,
            diagnostic_body.freeze(),
            source,
        );
        if status.is_client_error() {
            AttemptOutcome::Fatal(Error::Attempt(error))
        } else {
            AttemptOutcome::Retryable(error)
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Client")
            .field("client_name", &self.client_name)
            .field("store", &self.store)
            .field("buffer_pool", &self.buffer_pool)
            .field("default_options", &self.default_options)
            .finish_non_exhaustive()
    }
}
