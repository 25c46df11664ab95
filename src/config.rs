use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};

use crate::backoff::Backoff;
use crate::error::Error;
use crate::middleware::Middleware;
use crate::transport::TransportTuning;
use crate::util::{parse_header_name, parse_header_value};

pub const DEFAULT_RETRIES: usize = 3;

/// One per-call configuration record.
///
/// Options are applied in the order given; a later option overrides an
/// earlier one touching the same setting.
#[derive(Clone)]
pub enum RequestOption {
    Retries(usize),
    Backoff(Backoff),
    Headers(Vec<(String, String)>),
    /// Permit retries for methods other than `GET` and `HEAD`.
    ForceRetry,
    Middleware(Arc<dyn Middleware>),
    Tune(TransportTuning),
}

impl RequestOption {
    pub fn retries(count: usize) -> Self {
        Self::Retries(count)
    }

    pub fn backoff(backoff: Backoff) -> Self {
        Self::Backoff(backoff)
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Headers(vec![(name.into(), value.into())])
    }

    pub fn headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Headers(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    pub fn force_retry() -> Self {
        Self::ForceRetry
    }

    pub fn middleware(middleware: Arc<dyn Middleware>) -> Self {
        Self::Middleware(middleware)
    }

    pub fn max_idle_conns(count: usize) -> Self {
        Self::Tune(TransportTuning::MaxIdleConns(count))
    }

    pub fn max_idle_conns_per_host(count: usize) -> Self {
        Self::Tune(TransportTuning::MaxIdleConnsPerHost(count))
    }

    pub fn max_conns_per_host(count: usize) -> Self {
        Self::Tune(TransportTuning::MaxConnsPerHost(count))
    }

    pub fn idle_conn_timeout(timeout: Duration) -> Self {
        Self::Tune(TransportTuning::IdleConnTimeout(timeout))
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Tune(TransportTuning::Timeout(timeout))
    }
}

impl fmt::Debug for RequestOption {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retries(count) => formatter.debug_tuple("Retries").field(count).finish(),
            Self::Backoff(backoff) => formatter.debug_tuple("Backoff").field(backoff).finish(),
            Self::Headers(headers) => {
                let names = headers.iter().map(|(name, _)| name).collect::<Vec<_>>();
                formatter.debug_tuple("Headers").field(&names).finish()
            }
            Self::ForceRetry => formatter.write_str("ForceRetry"),
            Self::Middleware(_) => formatter.write_str("Middleware(..)"),
            Self::Tune(tuning) => formatter.debug_tuple("Tune").field(tuning).finish(),
        }
    }
}

/// Effective configuration of one `execute` call.
#[derive(Clone)]
pub struct RequestConfig {
    retries: usize,
    backoff: Backoff,
    headers: HeaderMap,
    force_retry: bool,
    middlewares: Vec<Arc<dyn Middleware>>,
    tunings: Vec<TransportTuning>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: Backoff::default(),
            headers: HeaderMap::new(),
            force_retry: false,
            middlewares: Vec::new(),
            tunings: Vec::new(),
        }
    }
}

impl RequestConfig {
    /// Folds options left to right over the defaults.
    ///
    /// Header names and values are validated here, before any network work.
    pub fn from_options<I>(options: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        let mut config = Self::default();
        for option in options {
            config.apply(option)?;
        }
        Ok(config)
    }

    fn apply(&mut self, option: RequestOption) -> Result<(), Error> {
        match option {
            RequestOption::Retries(count) => self.retries = count,
            RequestOption::Backoff(backoff) => self.backoff = backoff,
            RequestOption::Headers(headers) => {
                for (name, value) in headers {
                    let header_name = parse_header_name(&name)?;
                    let header_value = parse_header_value(&name, &value)?;
                    self.headers.insert(header_name, header_value);
                }
            }
            RequestOption::ForceRetry => self.force_retry = true,
            RequestOption::Middleware(middleware) => self.middlewares.push(middleware),
            RequestOption::Tune(tuning) => self.tunings.push(tuning),
        }
        Ok(())
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn max_attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn force_retry(&self) -> bool {
        self.force_retry
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub fn tunings(&self) -> &[TransportTuning] {
        &self.tunings
    }

    /// Only `GET` and `HEAD` are retried unless retries are forced.
    pub fn retry_permitted(&self, method: &Method) -> bool {
        self.force_retry || *method == Method::GET || *method == Method::HEAD
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RequestConfig")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("force_retry", &self.force_retry)
            .field("middlewares", &self.middlewares.len())
            .field("tunings", &self.tunings)
            .finish()
    }
}
