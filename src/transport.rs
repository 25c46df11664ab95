use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, SizeHint};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_service::Service;
use tracing::{debug, warn};

use crate::body::{ReqBody, ResBody};
use crate::error::{BoxError, Error, TransportError};
use crate::util::{
    classify_transport_error, host_key, lock_unpoisoned, read_unpoisoned, write_unpoisoned,
};

pub const DEFAULT_MAX_IDLE_CONNS: usize = 100;
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const HOST_LIMITER_MAX_ENTRIES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    RustlsAwsLcRs,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "rustls-ring",
            Self::RustlsAwsLcRs => "rustls-aws-lc-rs",
        }
    }
}

fn default_tls_backend() -> TlsBackend {
    if cfg!(feature = "tls-rustls-ring") {
        TlsBackend::RustlsRing
    } else {
        TlsBackend::RustlsAwsLcRs
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsRootStore {
    #[default]
    WebPki,
    System,
}

/// Pooling, timeout and TLS knobs of a [`SharedTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    /// `None` leaves the number of connections per host unbounded.
    pub max_conns_per_host: Option<usize>,
    pub idle_conn_timeout: Duration,
    /// Bound on setting up a connection: TCP connect plus the TLS handshake.
    pub connect_timeout: Duration,
    /// Bound on a single send, from request start to response headers.
    pub timeout: Duration,
    pub http2_only: bool,
    pub tls_backend: TlsBackend,
    pub tls_root_store: TlsRootStore,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self {
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            max_idle_conns_per_host: parallelism + 1,
            max_conns_per_host: None,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            http2_only: false,
            tls_backend: default_tls_backend(),
            tls_root_store: TlsRootStore::default(),
        }
    }
}

impl TransportSettings {
    /// hyper only caps idle connections per host, so the global cap bounds it.
    pub fn effective_idle_per_host(&self) -> usize {
        self.max_idle_conns_per_host.min(self.max_idle_conns)
    }

    fn pool_differs(&self, other: &Self) -> bool {
        self.max_idle_conns != other.max_idle_conns
            || self.max_idle_conns_per_host != other.max_idle_conns_per_host
            || self.idle_conn_timeout != other.idle_conn_timeout
            || self.connect_timeout != other.connect_timeout
            || self.http2_only != other.http2_only
            || self.tls_backend != other.tls_backend
            || self.tls_root_store != other.tls_root_store
    }
}

/// The wire-level send operation underneath the middleware chain.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request<ReqBody>,
    ) -> BoxFuture<'_, Result<Response<ResBody>, TransportError>>;

    /// Builds a replacement honoring new pool settings.
    ///
    /// `Ok(None)` keeps the current connector, which then manages its own pooling.
    fn reconfigure(&self, _settings: &TransportSettings) -> crate::Result<Option<Arc<dyn Transport>>> {
        Ok(None)
    }
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Bounds a whole connection setup, TLS handshake included.
///
/// `HttpConnector`'s own connect timeout stops at the TCP connect.
#[derive(Clone, Debug)]
struct ConnectTimeout<S> {
    inner: S,
    timeout: Duration,
}

impl<S> ConnectTimeout<S> {
    fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<S> Service<http::Uri> for ConnectTimeout<S>
where
    S: Service<http::Uri>,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, destination: http::Uri) -> Self::Future {
        let timeout = self.timeout;
        let connecting = self.inner.call(destination);
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(connected) => connected.map_err(Into::into),
                Err(_) => Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection setup timed out after {}ms", timeout.as_millis()),
                )) as BoxError),
            }
        })
    }
}

/// Connection-pooled HTTP/1.1 + HTTP/2 transport over rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<ConnectTimeout<HttpsConnector>, ReqBody>,
}

impl HyperTransport {
    pub fn new(settings: &TransportSettings) -> crate::Result<Self> {
        let tls_config = build_rustls_config(settings)?;
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(settings.connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(settings.idle_conn_timeout)
            .pool_max_idle_per_host(settings.effective_idle_per_host())
            .http2_only(settings.http2_only)
            .build(ConnectTimeout::new(https, settings.connect_timeout));
        Ok(Self { client })
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<ReqBody>,
    ) -> BoxFuture<'_, Result<Response<ResBody>, TransportError>> {
        Box::pin(async move {
            let response = self.client.request(request).await.map_err(|source| {
                let kind = classify_transport_error(&source);
                TransportError::new(kind, source)
            })?;
            Ok(response.map(|body| body.map_err(|error| Box::new(error) as BoxError).boxed()))
        })
    }

    fn reconfigure(&self, settings: &TransportSettings) -> crate::Result<Option<Arc<dyn Transport>>> {
        Ok(Some(Arc::new(Self::new(settings)?)))
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

fn crypto_provider(backend: TlsBackend) -> crate::Result<Arc<rustls::crypto::CryptoProvider>> {
    match backend {
        #[cfg(feature = "tls-rustls-ring")]
        TlsBackend::RustlsRing => Ok(Arc::new(rustls::crypto::ring::default_provider())),
        #[cfg(feature = "tls-rustls-aws-lc-rs")]
        TlsBackend::RustlsAwsLcRs => Ok(Arc::new(rustls::crypto::aws_lc_rs::default_provider())),
        #[allow(unreachable_patterns)]
        _ => Err(Error::TlsBackendUnavailable {
            backend: backend.as_str(),
        }),
    }
}

fn build_root_store(
    backend: TlsBackend,
    root_store: TlsRootStore,
) -> crate::Result<rustls::RootCertStore> {
    match root_store {
        TlsRootStore::WebPki => Ok(rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        )),
        TlsRootStore::System => {
            let loaded = rustls_native_certs::load_native_certs();
            if !loaded.errors.is_empty() {
                warn!(
                    backend = backend.as_str(),
                    error_count = loaded.errors.len(),
                    "system root certificate loading returned partial errors"
                );
            }
            let mut store = rustls::RootCertStore::empty();
            let (added, _ignored) = store.add_parsable_certificates(loaded.certs);
            if added == 0 {
                return Err(Error::TlsConfig {
                    backend: backend.as_str(),
                    message: "failed to load system root certificates".to_owned(),
                });
            }
            Ok(store)
        }
    }
}

fn build_rustls_config(settings: &TransportSettings) -> crate::Result<rustls::ClientConfig> {
    let backend = settings.tls_backend;
    let provider = crypto_provider(backend)?;
    let root_store = build_root_store(backend, settings.tls_root_store)?;
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|source| Error::TlsBackendInit {
            backend: backend.as_str(),
            message: source.to_string(),
        })?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}

/// Caps concurrent connections per host.
///
/// The permit rides along with the response body, so a connection counts
/// against the cap until its body is dropped.
struct HostConnectionLimiter {
    limit: usize,
    hosts: Mutex<BTreeMap<String, Arc<Semaphore>>>,
}

impl HostConnectionLimiter {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            hosts: Mutex::new(BTreeMap::new()),
        }
    }

    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = lock_unpoisoned(&self.hosts);
        if let Some(semaphore) = hosts.get(host) {
            return Arc::clone(semaphore);
        }
        if hosts.len() >= HOST_LIMITER_MAX_ENTRIES {
            let limit = self.limit;
            hosts.retain(|_, semaphore| semaphore.available_permits() < limit);
        }
        let semaphore = Arc::new(Semaphore::new(self.limit));
        hosts.insert(host.to_owned(), Arc::clone(&semaphore));
        semaphore
    }

    async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, TransportError> {
        self.semaphore_for(host)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::other(format!("connection limiter for {host} is closed")))
    }
}

struct PermitBody {
    inner: ResBody,
    _permit: OwnedSemaphorePermit,
}

impl Body for PermitBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Handle on the transport currently used to issue requests.
///
/// Cloning is cheap; clones share the connector and its connection pool.
#[derive(Clone)]
pub struct SharedTransport {
    settings: Arc<TransportSettings>,
    connector: Arc<dyn Transport>,
    host_limiter: Option<Arc<HostConnectionLimiter>>,
}

impl SharedTransport {
    pub fn new(settings: TransportSettings, connector: Arc<dyn Transport>) -> Self {
        let host_limiter = settings
            .max_conns_per_host
            .map(|limit| Arc::new(HostConnectionLimiter::new(limit)));
        Self {
            settings: Arc::new(settings),
            connector,
            host_limiter,
        }
    }

    pub fn hyper(settings: TransportSettings) -> crate::Result<Self> {
        let connector = Arc::new(HyperTransport::new(&settings)?);
        Ok(Self::new(settings, connector))
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn send(
        &self,
        request: Request<ReqBody>,
    ) -> BoxFuture<'_, Result<Response<ResBody>, TransportError>> {
        Box::pin(async move {
            let permit = match &self.host_limiter {
                Some(limiter) => Some(limiter.acquire(&host_key(request.uri())).await?),
                None => None,
            };
            let response = self.connector.send(request).await?;
            Ok(match permit {
                Some(permit) => response.map(|inner| {
                    PermitBody {
                        inner,
                        _permit: permit,
                    }
                    .boxed()
                }),
                None => response,
            })
        })
    }

    fn tuned(&self, settings: TransportSettings) -> crate::Result<Self> {
        let connector = if settings.pool_differs(&self.settings) {
            self.connector
                .reconfigure(&settings)?
                .unwrap_or_else(|| Arc::clone(&self.connector))
        } else {
            Arc::clone(&self.connector)
        };
        let host_limiter = if settings.max_conns_per_host == self.settings.max_conns_per_host {
            self.host_limiter.clone()
        } else {
            settings
                .max_conns_per_host
                .map(|limit| Arc::new(HostConnectionLimiter::new(limit)))
        };
        Ok(Self {
            settings: Arc::new(settings),
            connector,
            host_limiter,
        })
    }
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SharedTransport")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A tuning step applied to the store's current settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportTuning {
    MaxIdleConns(usize),
    MaxIdleConnsPerHost(usize),
    /// `0` removes the cap.
    MaxConnsPerHost(usize),
    IdleConnTimeout(Duration),
    Timeout(Duration),
}

impl TransportTuning {
    pub(crate) fn apply(self, settings: &mut TransportSettings) {
        match self {
            Self::MaxIdleConns(count) => settings.max_idle_conns = count,
            Self::MaxIdleConnsPerHost(count) => settings.max_idle_conns_per_host = count,
            Self::MaxConnsPerHost(0) => settings.max_conns_per_host = None,
            Self::MaxConnsPerHost(count) => settings.max_conns_per_host = Some(count),
            Self::IdleConnTimeout(timeout) => settings.idle_conn_timeout = timeout,
            Self::Timeout(timeout) => settings.timeout = timeout.max(Duration::from_millis(1)),
        }
    }
}

/// Reader/writer-locked holder of the active [`SharedTransport`].
///
/// Readers only hold the lock long enough to clone the handle, so a writer
/// never waits on in-flight requests.
pub struct TransportStore {
    current: RwLock<SharedTransport>,
}

impl TransportStore {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            current: RwLock::new(transport),
        }
    }

    pub fn get(&self) -> SharedTransport {
        read_unpoisoned(&self.current).clone()
    }

    pub fn set(&self, transport: SharedTransport) {
        *write_unpoisoned(&self.current) = transport;
    }

    pub fn settings(&self) -> TransportSettings {
        read_unpoisoned(&self.current).settings().clone()
    }

    pub fn set_max_idle_conns(&self, count: usize) -> crate::Result<()> {
        self.apply(&[TransportTuning::MaxIdleConns(count)])
    }

    pub fn set_max_idle_conns_per_host(&self, count: usize) -> crate::Result<()> {
        self.apply(&[TransportTuning::MaxIdleConnsPerHost(count)])
    }

    pub fn set_max_conns_per_host(&self, count: usize) -> crate::Result<()> {
        self.apply(&[TransportTuning::MaxConnsPerHost(count)])
    }

    pub fn set_idle_conn_timeout(&self, timeout: Duration) -> crate::Result<()> {
        self.apply(&[TransportTuning::IdleConnTimeout(timeout)])
    }

    pub fn set_timeout(&self, timeout: Duration) -> crate::Result<()> {
        self.apply(&[TransportTuning::Timeout(timeout)])
    }

    /// Applies all tunings in order as a single read-modify-write.
    ///
    /// A change to a pool knob (idle caps, idle timeout) builds a new connector
    /// whose pool starts empty; warm connections of the old one are not carried
    /// over. Callers alternating pool values per request reconnect on every
    /// change. `Timeout` and `MaxConnsPerHost` keep the current connector.
    pub fn apply(&self, tunings: &[TransportTuning]) -> crate::Result<()> {
        if tunings.is_empty() {
            return Ok(());
        }
        let mut current = write_unpoisoned(&self.current);
        let mut settings = current.settings().clone();
        for tuning in tunings {
            tuning.apply(&mut settings);
        }
        if settings == *current.settings() {
            return Ok(());
        }
        let tuned = current.tuned(settings)?;
        debug!(settings = ?tuned.settings(), "transport settings updated");
        *current = tuned;
        Ok(())
    }
}

impl fmt::Debug for TransportStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransportStore")
            .field("current", &self.get())
            .finish()
    }
}
