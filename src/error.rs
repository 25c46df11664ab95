use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on the response body bytes kept for diagnostics.
pub const MAX_ERROR_BODY_BYTES: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure of a single send that produced no HTTP response.
#[derive(Debug, Error)]
#[error("{kind} transport error: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message.into())
    }

    pub(crate) fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

/// Terminal failure of an orchestrated request.
///
/// `status` is `0` when no HTTP response was obtained. The body is the
/// response body prefix read for diagnostics, never longer than
/// [`MAX_ERROR_BODY_BYTES`].
#[derive(Debug)]
pub struct AttemptError {
    status: u16,
    method: Method,
    url: String,
    body: Bytes,
    source: Option<TransportError>,
}

impl AttemptError {
    pub(crate) fn new(
        status: u16,
        method: Method,
        url: impl Into<String>,
        body: Bytes,
        source: Option<TransportError>,
    ) -> Self {
        let body = if body.len() > MAX_ERROR_BODY_BYTES {
            body.slice(..MAX_ERROR_BODY_BYTES)
        } else {
            body
        };
        Self {
            status,
            method,
            url: url.into(),
            body,
            source,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        self.source.as_ref()
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} failed: status {}, body: {:?}",
            self.method,
            self.url,
            self.status,
            String::from_utf8_lossy(&self.body)
        )?;
        if let Some(source) = &self.source {
            write!(formatter, ", error: {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AttemptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Attempt,
    Cancelled,
    DeadlineExceeded,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    SerializeJson,
    SerializeForm,
    EmptyMultipart,
    ReadFile,
    ReadBody,
    Deserialize,
    EncodeEnvelope,
    TlsBackendUnavailable,
    TlsBackendInit,
    TlsConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::EmptyMultipart => "empty_multipart",
            Self::ReadFile => "read_file",
            Self::ReadBody => "read_body",
            Self::Deserialize => "deserialize",
            Self::EncodeEnvelope => "encode_envelope",
            Self::TlsBackendUnavailable => "tls_backend_unavailable",
            Self::TlsBackendInit => "tls_backend_init",
            Self::TlsConfig => "tls_config",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("multipart upload needs at least one field or file")]
    EmptyMultipart,
    #[error("failed to read upload file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to encode response envelope: {source}")]
    EncodeEnvelope {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode response envelope as xml: {source}")]
    EncodeEnvelopeXml {
        #[source]
        source: quick_xml::se::SeError,
    },
    #[error("requested tls backend is not enabled in this build: {backend}")]
    TlsBackendUnavailable { backend: &'static str },
    #[error("failed to initialize tls backend {backend}: {message}")]
    TlsBackendInit {
        backend: &'static str,
        message: String,
    },
    #[error("invalid tls configuration for backend {backend}: {message}")]
    TlsConfig {
        backend: &'static str,
        message: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Attempt(_) => ErrorCode::Attempt,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::EmptyMultipart => ErrorCode::EmptyMultipart,
            Self::ReadFile { .. } => ErrorCode::ReadFile,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::EncodeEnvelope { .. } | Self::EncodeEnvelopeXml { .. } => {
                ErrorCode::EncodeEnvelope
            }
            Self::TlsBackendUnavailable { .. } => ErrorCode::TlsBackendUnavailable,
            Self::TlsBackendInit { .. } => ErrorCode::TlsBackendInit,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
        }
    }

    /// True for errors produced by the caller's [`Context`](crate::Context).
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// HTTP status of the final attempt, when one produced a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Attempt(error) if error.status() != 0 => Some(error.status()),
            _ => None,
        }
    }

    pub fn as_attempt(&self) -> Option<&AttemptError> {
        match self {
            Self::Attempt(error) => Some(error),
            _ => None,
        }
    }
}
