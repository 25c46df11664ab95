//! Request and response body types shared by transports and middleware.

use std::convert::Infallible;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::buffer_pool::{BufferPool, POOLED_BODY_THRESHOLD, PooledBuffer};
use crate::error::{BoxError, Error};

pub type ReqBody = BoxBody<Bytes, BoxError>;
pub type ResBody = BoxBody<Bytes, BoxError>;

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

pub fn empty() -> BoxBody<Bytes, BoxError> {
    Empty::new().map_err(map_infallible_to_box_error).boxed()
}

pub fn full(body: impl Into<Bytes>) -> BoxBody<Bytes, BoxError> {
    Full::new(body.into())
        .map_err(map_infallible_to_box_error)
        .boxed()
}

/// Body representation for one attempt.
///
/// A pooled buffer stays checked out until this value is dropped at the end
/// of the attempt.
pub(crate) enum AttemptBody {
    Empty,
    Direct(Bytes),
    Pooled(PooledBuffer),
}

impl AttemptBody {
    pub(crate) fn prepare(pool: &BufferPool, body: Option<&Bytes>) -> Self {
        match body {
            None => Self::Empty,
            Some(body) if body.len() < POOLED_BODY_THRESHOLD => Self::Direct(body.clone()),
            Some(body) => {
                let mut buffer = pool.acquire();
                buffer.extend_from_slice(body);
                Self::Pooled(buffer)
            }
        }
    }

    pub(crate) fn request_body(&mut self) -> ReqBody {
        match self {
            Self::Empty => empty(),
            Self::Direct(body) => full(body.clone()),
            Self::Pooled(buffer) => full(buffer.freeze()),
        }
    }

    pub(crate) fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, Error> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .map_err(|source| Error::RequestBuild { source })?;
    request.headers_mut().extend(headers.clone());
    Ok(request)
}

/// Reads at most `limit` bytes into `collected` for diagnostics; the rest of
/// the body is dropped.
///
/// Bytes land in `collected` as frames arrive, so a caller that stops waiting
/// keeps whatever was read so far.
pub(crate) async fn read_body_prefix(mut body: ResBody, collected: &mut BytesMut, limit: usize) {
    while collected.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    let take = (limit - collected.len()).min(data.len());
                    collected.extend_from_slice(&data[..take]);
                }
            }
            Some(Err(_)) | None => break,
        }
    }
}

pub(crate) async fn read_all_body(body: ResBody) -> Result<Bytes, Error> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|source| Error::ReadBody { source })
}
