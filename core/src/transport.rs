use crate::error::ChatError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const AUTHORIZATION: &str = "Authorization";

/// Raw body segments as they arrive from the network.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ChatError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets or replaces the bearer credential.
    pub fn set_bearer(&mut self, token: Option<&str>) {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(AUTHORIZATION));
        if let Some(token) = token {
            self.headers
                .push((AUTHORIZATION.to_string(), format!("Bearer {token}")));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ChatError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The backend's `message` field, falling back to a truncated body.
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| self.text().chars().take(200).collect())
    }
}

pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Generic request/response collaborator used by the request pipeline.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChatError>;

    async fn open_stream(&self, request: ApiRequest) -> Result<StreamingResponse, ChatError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, path: &str) -> Result<Url, ChatError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|err| ChatError::Transport(format!("invalid url {joined}: {err}")))
    }

    fn build(&self, request: ApiRequest) -> Result<reqwest::RequestBuilder, ChatError> {
        let url = self.url_for(&request.path)?;
        let mut builder = self.client.request(request.method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        debug!(method = %request.method, path = %request.path, "http request");
        let response = self.build(request)?.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, request: ApiRequest) -> Result<StreamingResponse, ChatError> {
        debug!(method = %request.method, path = %request.path, "http stream");
        let response = self
            .build(request)?
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|segment| {
                segment
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| ChatError::StreamFailure(err.to_string()))
            })
            .boxed();
        Ok(StreamingResponse { status, body })
    }
}

/// How a scripted stream ends once its segments are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnding {
    Close,
    Drop(String),
    /// Never yields again; used to exercise cancellation.
    Hang,
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Body {
        status: u16,
        body: Vec<u8>,
    },
    Stream {
        status: u16,
        segments: Vec<Vec<u8>>,
        ending: StreamEnding,
    },
    Unreachable(String),
}

impl ScriptedReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Body {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Body {
            status,
            body: Vec::new(),
        }
    }

    /// A successful event stream delivered in the given segments.
    pub fn events<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            status: 200,
            segments: segments
                .into_iter()
                .map(|segment| segment.into().into_bytes())
                .collect(),
            ending: StreamEnding::Close,
        }
    }

    pub fn ending(self, ending: StreamEnding) -> Self {
        match self {
            Self::Stream {
                status, segments, ..
            } => Self::Stream {
                status,
                segments,
                ending,
            },
            other => other,
        }
    }
}

/// In-process backend that answers from per-route queues and records every
/// request it sees. Unscripted routes answer 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<(Method, String), VecDeque<ScriptedReply>>>>,
    log: Arc<Mutex<Vec<ApiRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, method: Method, path: impl Into<String>, reply: ScriptedReply) {
        self.routes
            .lock()
            .entry((method, path.into()))
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().clone()
    }

    pub fn request_count(&self, method: &Method, path: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|request| &request.method == method && request.path == path)
            .count()
    }

    fn next_reply(&self, request: &ApiRequest) -> ScriptedReply {
        self.log.lock().push(request.clone());
        self.routes
            .lock()
            .get_mut(&(request.method.clone(), request.path.clone()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ScriptedReply::json(404, serde_json::json!({ "message": "Not found" })))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        match self.next_reply(&request) {
            ScriptedReply::Body { status, body } => Ok(ApiResponse {
                status,
                headers: Vec::new(),
                body,
            }),
            ScriptedReply::Stream {
                status, segments, ..
            } => Ok(ApiResponse {
                status,
                headers: Vec::new(),
                body: segments.concat(),
            }),
            ScriptedReply::Unreachable(reason) => Err(ChatError::Transport(reason)),
        }
    }

    async fn open_stream(&self, request: ApiRequest) -> Result<StreamingResponse, ChatError> {
        match self.next_reply(&request) {
            ScriptedReply::Body { status, body } => Ok(StreamingResponse {
                status,
                body: stream::iter(vec![Ok(body)]).boxed(),
            }),
            ScriptedReply::Stream {
                status,
                segments,
                ending,
            } => {
                let head = stream::iter(segments.into_iter().map(Ok));
                let body = match ending {
                    StreamEnding::Close => head.boxed(),
                    StreamEnding::Drop(reason) => head
                        .chain(stream::once(async move {
                            Err(ChatError::StreamFailure(reason))
                        }))
                        .boxed(),
                    StreamEnding::Hang => head.chain(stream::pending()).boxed(),
                };
                Ok(StreamingResponse { status, body })
            }
            ScriptedReply::Unreachable(reason) => Err(ChatError::Transport(reason)),
        }
    }
}
