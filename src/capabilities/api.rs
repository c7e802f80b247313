use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_HEADERS_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A single outbound request. Paths are relative; the shell owns the base
/// URL. Every request carries an explicit timeout so no core fetch can
/// outlive the component that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

impl Operation for ApiRequest {
    type Output = ApiResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_no_content(&self) -> bool {
        self.status == 204
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ApiError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled by the shell")]
    Cancelled,

    #[error("transport error: {message}")]
    Other { message: String },
}

impl ApiError {
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

pub type ApiResult = Result<ApiResponse, ApiError>;

#[derive(Clone)]
pub struct Api<Ev> {
    context: CapabilityContext<ApiRequest, Ev>,
}

impl<Ev> Capability<Ev> for Api<Ev> {
    type Operation = ApiRequest;
    type MappedSelf<MappedEv> = Api<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Api::new(self.context.map_event(f))
    }
}

impl<Ev> Api<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<ApiRequest, Ev>) -> Self {
        Self { context }
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_, Ev> {
        RequestBuilder::new(&self.context, Method::Get, path.into())
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_, Ev> {
        RequestBuilder::new(&self.context, Method::Post, path.into())
    }
}

pub struct RequestBuilder<'a, Ev> {
    context: &'a CapabilityContext<ApiRequest, Ev>,
    request: ApiRequest,
}

impl<'a, Ev> RequestBuilder<'a, Ev>
where
    Ev: 'static,
{
    fn new(
        context: &'a CapabilityContext<ApiRequest, Ev>,
        method: Method,
        path: String,
    ) -> Self {
        Self {
            context,
            request: ApiRequest {
                method,
                path,
                headers: Vec::new(),
                body: None,
                timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            },
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let name_lower = name.to_lowercase();
        self.request
            .headers
            .retain(|(n, _)| n.to_lowercase() != name_lower);
        if self.request.headers.len() < MAX_HEADERS_COUNT {
            self.request.headers.push((name, value.into()));
        }
        self
    }

    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.request.body = Some(body);
        self.header("Content-Type", "application/json")
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn send<F>(self, make_event: F)
    where
        F: FnOnce(ApiResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        let request = self.request;
        self.context.spawn(async move {
            let result = context.request_from_shell(request).await;
            context.update_app(make_event(result));
        });
    }
}
