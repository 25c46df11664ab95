//! Business-status envelope `{"code", "msg", "data"}` for JSON and XML payloads.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const BUSINESS_CODE_OK: i64 = 0;
pub const BUSINESS_MSG_OK: &str = "ok";
pub const BUSINESS_CODE_ERROR: i64 = -1;

const XML_ROOT: &str = "xml";
const XML_VERSION: &str = "1.0";
const XML_ENCODING: &str = "UTF-8";

/// A business-level error carrying its own code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMsg {
    pub code: i64,
    pub msg: String,
}

impl CodeMsg {
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for CodeMsg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "code={}, msg={}", self.code, self.msg)
    }
}

impl std::error::Error for CodeMsg {}

/// What a handler produced, before it is wrapped into an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Business(CodeMsg),
    Failure(String),
    Success(T),
}

impl<T> Outcome<T> {
    pub fn failure(error: &dyn std::error::Error) -> Self {
        Self::Failure(error.to_string())
    }
}

impl<T> From<CodeMsg> for Outcome<T> {
    fn from(code_msg: CodeMsg) -> Self {
        Self::Business(code_msg)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: BUSINESS_CODE_OK,
            msg: BUSINESS_MSG_OK.to_owned(),
            data: Some(data),
        }
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Business(CodeMsg { code, msg }) => Self {
                code,
                msg,
                data: None,
            },
            Outcome::Failure(msg) => Self {
                code: BUSINESS_CODE_ERROR,
                msg,
                data: None,
            },
            Outcome::Success(data) => Self::ok(data),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == BUSINESS_CODE_OK
    }
}

impl<T> Envelope<T>
where
    T: Serialize,
{
    /// Newline-terminated JSON, matching a streaming encoder's output.
    pub fn to_json(&self) -> crate::Result<Bytes> {
        let mut encoded =
            serde_json::to_vec(self).map_err(|source| Error::EncodeEnvelope { source })?;
        encoded.push(b'\n');
        Ok(Bytes::from(encoded))
    }

    /// `<xml version="1.0" encoding="UTF-8"><code/><msg/><data/></xml>`; `data` is omitted when absent.
    pub fn to_xml(&self) -> crate::Result<Bytes> {
        let document = XmlEnvelope {
            version: XML_VERSION,
            encoding: XML_ENCODING,
            code: self.code,
            msg: &self.msg,
            data: self.data.as_ref(),
        };
        let encoded = quick_xml::se::to_string_with_root(XML_ROOT, &document)
            .map_err(|source| Error::EncodeEnvelopeXml { source })?;
        Ok(Bytes::from(encoded))
    }
}

#[derive(Serialize)]
struct XmlEnvelope<'a, T> {
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "@encoding")]
    encoding: &'static str,
    code: i64,
    msg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

impl<T> From<Outcome<T>> for Envelope<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self::from_outcome(outcome)
    }
}
