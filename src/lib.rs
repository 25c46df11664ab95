//! `reqflow` is a resilient outbound HTTP request engine with HTTP/1.1 + HTTP/2 support.
//!
//! Every request goes through [`Client::execute`]: per-call [`RequestOption`]s are
//! folded into one configuration, the request is sent through a middleware chain
//! over a shared, tunable connection pool, and failed attempts are retried with
//! backoff while the caller's [`Context`] can cancel at any point.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqflow::prelude::{Backoff, Client, Context, RequestOption};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .client_name("my-sdk")
//!         .timeout(Duration::from_secs(3))
//!         .try_build()?;
//!
//!     let ctx = Context::background().with_timeout(Duration::from_secs(8));
//!     let item: Item = client
//!         .get(
//!             &ctx,
//!             "https://api.example.com/v1/items/1",
//!             [
//!                 RequestOption::retries(2),
//!                 RequestOption::backoff(Backoff::exponential_with(
//!                     Duration::from_millis(100),
//!                     Duration::from_millis(800),
//!                 )),
//!                 RequestOption::header("accept", "application/json"),
//!             ],
//!         )
//!         .await?
//!         .json()
//!         .await?;
//!
//!     println!("item id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Retry Rules
//!
//! - `GET` and `HEAD` are retried on 5xx responses, transport errors and timeouts.
//! - Other methods are sent once unless [`RequestOption::ForceRetry`] is given.
//! - 4xx responses are never retried.

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    not(feature = "tls-rustls-aws-lc-rs")
))]
compile_error!(
    "reqflow requires one TLS backend feature: enable `tls-rustls-ring` or `tls-rustls-aws-lc-rs`"
);

mod backoff;
mod body;
mod buffer_pool;
mod client;
mod config;
mod context;
pub mod envelope;
mod error;
pub mod mask;
mod metrics;
pub mod middleware;
mod multipart;
mod request;
mod response;
pub mod split;
mod transport;
mod util;

pub use crate::backoff::{Backoff, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF};
pub use crate::body::{ReqBody, ResBody};
pub use crate::buffer_pool::{BufferPool, BufferPoolStats, POOLED_BODY_THRESHOLD, PooledBuffer};
pub use crate::client::{Client, ClientBuilder};
pub use crate::config::{DEFAULT_RETRIES, RequestConfig, RequestOption};
pub use crate::context::Context;
pub use crate::error::{
    AttemptError, BoxError, Error, ErrorCode, MAX_ERROR_BODY_BYTES, TransportError,
    TransportErrorKind,
};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::middleware::{Middleware, MiddlewareChain, Next, SendResult};
pub use crate::multipart::{MultipartFile, MultipartForm};
pub use crate::response::HttpResponse;
pub use crate::transport::{
    HyperTransport, SharedTransport, TlsBackend, TlsRootStore, Transport, TransportSettings,
    TransportStore, TransportTuning,
};

pub mod body_util {
    pub use crate::body::{empty, full};
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Backoff, Client, ClientBuilder, Context, Error, HttpResponse, Middleware, MultipartFile,
        MultipartForm, Next, RequestOption, Result, TransportStore, TransportTuning,
    };
}

#[cfg(test)]
mod tests;
