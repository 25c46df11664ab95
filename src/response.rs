use bytes::Bytes;
use http::{HeaderMap, Method, Response, StatusCode, Version};
use serde::de::DeserializeOwned;

use crate::body::{ResBody, read_all_body};
use crate::error::{Error, MAX_ERROR_BODY_BYTES};

/// A successful response whose body has not been read yet.
///
/// Dropping it without reading the body releases the connection.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    method: Method,
    url: String,
    body: ResBody,
}

impl HttpResponse {
    pub(crate) fn new(method: Method, url: String, response: Response<ResBody>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            method,
            url,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn into_body(self) -> ResBody {
        self.body
    }

    pub fn into_http(self) -> Response<ResBody> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }

    pub async fn bytes(self) -> crate::Result<Bytes> {
        read_all_body(self.body).await
    }

    pub async fn text(self) -> crate::Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&body),
        })
    }
}

fn truncate_body(body: &[u8]) -> String {
    let end = body.len().min(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
