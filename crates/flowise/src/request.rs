//! A small HTTP utility that never fails loudly.
//!
//! Every outcome of [`send_request`], including connection failures,
//! non-2xx statuses and undecodable bodies, is folded into a
//! [`RequestResult`]. Callers inspect `data` / `error` instead of
//! handling a `Result` and panics never cross this boundary.

use std::time::Duration;

use bytes::Bytes;
use chatflow_embed_protocol::{AttachmentFile, ErrorKind};
use mime::Mime;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Error;
use crate::io::Chunks;

/// How the response body should be consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Buffer and decode as JSON.
    #[default]
    Json,
    /// Buffer as UTF-8 text.
    Text,
    /// Buffer as raw bytes.
    Binary,
    /// Do not buffer; hand back a reader for incremental consumption.
    Stream,
}

/// Body of an outbound request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// A JSON document.
    Json(Value),
    /// Multipart form data, one `files` part per file.
    Multipart(Vec<AttachmentFile>),
}

/// Parameters of one outbound request.
#[derive(Clone, Debug)]
pub struct RequestParams {
    pub(crate) url: String,
    pub(crate) method: Method,
    pub(crate) body: Option<RequestBody>,
    pub(crate) response_type: ResponseType,
    pub(crate) api_key: Option<String>,
    pub(crate) timeout: Option<Duration>,
}

impl RequestParams {
    /// Creates parameters for a request with the given method and
    /// absolute URL.
    #[inline]
    pub fn new<S: Into<String>>(method: Method, url: S) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            response_type: ResponseType::default(),
            api_key: None,
            timeout: None,
        }
    }

    /// Shorthand for a `GET` request.
    #[inline]
    pub fn get<S: Into<String>>(url: S) -> Self {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` request.
    #[inline]
    pub fn post<S: Into<String>>(url: S) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attaches a body.
    #[inline]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets how the response should be consumed.
    #[inline]
    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Sends the key as a bearer token.
    #[inline]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Limits the whole exchange, body included, to `timeout`.
    ///
    /// This should not be used with [`ResponseType::Stream`], since a
    /// long answer would be cut off.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response body consumed according to its [`ResponseType`].
pub enum ResponseBody {
    /// Decoded JSON.
    Json(Value),
    /// Text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
    /// An unconsumed body.
    Stream(StreamBody),
}

/// An unconsumed response body.
pub struct StreamBody {
    pub(crate) content_type: Option<Mime>,
    pub(crate) chunks: Chunks,
}

impl StreamBody {
    /// Returns `true` if the server answered with server-sent events.
    #[inline]
    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|m| m.subtype().as_str() == "event-stream")
            .unwrap_or(false)
    }
}

/// The outcome of [`send_request`]. Exactly one field is set.
pub struct RequestResult<T> {
    /// The response data on success.
    pub data: Option<T>,
    /// The error on failure.
    pub error: Option<Error>,
}

impl<T> RequestResult<T> {
    #[inline]
    fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    #[inline]
    fn err(error: Error) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    /// Converts into a `Result` for `?` propagation.
    #[inline]
    pub fn into_result(self) -> Result<T, Error> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => {
                Err(Error::new("empty request result", ErrorKind::InvalidPayload))
            }
        }
    }
}

/// Sends a request and consumes the response as requested.
pub async fn send_request(
    client: &Client,
    params: RequestParams,
) -> RequestResult<ResponseBody> {
    let RequestParams {
        url,
        method,
        body,
        response_type,
        api_key,
        timeout,
    } = params;
    trace!("{method} {url} ({response_type:?})");

    let mut builder = client.request(method, &url);
    if let Some(api_key) = api_key {
        builder = builder.bearer_auth(api_key);
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if response_type == ResponseType::Stream {
        builder =
            builder.header(header::ACCEPT, "text/event-stream, application/json");
    }
    builder = match body {
        Some(RequestBody::Json(value)) => builder.json(&value),
        Some(RequestBody::Multipart(files)) => match create_form(files) {
            Ok(form) => builder.multipart(form),
            Err(err) => return RequestResult::err(err),
        },
        None => builder,
    };

    let resp = match builder.send().await {
        Ok(resp) => resp,
        Err(err) => {
            debug!("request to {url} failed: {err}");
            return RequestResult::err(classify(err));
        }
    };
    if !resp.status().is_success() {
        return RequestResult::err(status_error(resp).await);
    }

    match response_type {
        ResponseType::Json => match resp.bytes().await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => RequestResult::ok(ResponseBody::Json(value)),
                Err(err) => RequestResult::err(Error::new(
                    format!("{err}"),
                    ErrorKind::InvalidPayload,
                )),
            },
            Err(err) => RequestResult::err(classify(err)),
        },
        ResponseType::Text => match resp.text().await {
            Ok(text) => RequestResult::ok(ResponseBody::Text(text)),
            Err(err) => RequestResult::err(classify(err)),
        },
        ResponseType::Binary => match resp.bytes().await {
            Ok(bytes) => RequestResult::ok(ResponseBody::Binary(bytes)),
            Err(err) => RequestResult::err(classify(err)),
        },
        ResponseType::Stream => {
            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            RequestResult::ok(ResponseBody::Stream(StreamBody {
                content_type,
                chunks: Chunks::from_response(resp),
            }))
        }
    }
}

/// Sends a request and decodes a JSON response into `T`.
pub async fn send_json_request<T: DeserializeOwned>(
    client: &Client,
    params: RequestParams,
) -> RequestResult<T> {
    let params = params.with_response_type(ResponseType::Json);
    let value = match send_request(client, params).await.into_result() {
        Ok(ResponseBody::Json(value)) => value,
        Ok(_) => {
            return RequestResult::err(Error::new(
                "unexpected response body",
                ErrorKind::InvalidPayload,
            ));
        }
        Err(err) => return RequestResult::err(err),
    };
    match serde_json::from_value(value) {
        Ok(data) => RequestResult::ok(data),
        Err(err) => RequestResult::err(Error::new(
            format!("{err}"),
            ErrorKind::InvalidPayload,
        )),
    }
}

fn create_form(files: Vec<AttachmentFile>) -> Result<Form, Error> {
    let mut form = Form::new();
    for file in files {
        let part = Part::bytes(file.bytes)
            .file_name(file.name)
            .mime_str(&file.mime)
            .map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidPayload)
            })?;
        form = form.part("files", part);
    }
    Ok(form)
}

#[inline]
fn classify(err: reqwest::Error) -> Error {
    let kind = match err.status() {
        Some(status) => ErrorKind::Http {
            status: status.as_u16(),
        },
        None if err.is_decode() => ErrorKind::InvalidPayload,
        None => ErrorKind::Network,
    };
    Error::new(format!("{err}"), kind)
}

async fn status_error(resp: Response) -> Error {
    let status = resp.status();
    let kind = ErrorKind::Http {
        status: status.as_u16(),
    };
    let body = resp.text().await.unwrap_or_default();
    Error::new(error_message(status.as_u16(), &body), kind)
}

/// Extracts a human-readable message from an error body.
fn error_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    });
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => {
            format!("request failed with status {status}: {}", body.trim())
        }
        None => format!("request failed with status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(500, r#"{"message":"Chatflow not found"}"#),
            "Chatflow not found"
        );
        assert_eq!(
            error_message(502, "Bad gateway"),
            "request failed with status 502: Bad gateway"
        );
        assert_eq!(error_message(404, ""), "request failed with status 404");
    }

    #[test]
    fn test_into_result() {
        let result = RequestResult::ok(1);
        assert_eq!(result.into_result().unwrap(), 1);

        let result: RequestResult<u32> =
            RequestResult::err(Error::new("boom", ErrorKind::Network));
        assert_eq!(result.into_result().unwrap_err().kind, ErrorKind::Network);
    }

    #[test]
    fn test_event_stream_detection() {
        let body = StreamBody {
            content_type: Some("text/event-stream; charset=utf-8".parse().unwrap()),
            chunks: Chunks::from_vec_deque(Default::default()),
        };
        assert!(body.is_event_stream());
        let body = StreamBody {
            content_type: Some(mime::APPLICATION_JSON),
            chunks: Chunks::from_vec_deque(Default::default()),
        };
        assert!(!body.is_event_stream());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let client = Client::new();
        // Port 9 (discard) on localhost is expected to refuse connections.
        let result = send_request(
            &client,
            RequestParams::get("http://127.0.0.1:9/api/v1/ping")
                .with_timeout(Duration::from_secs(2)),
        )
        .await;
        assert!(result.data.is_none());
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
    }
}
