//! Normalized request/response shapes exchanged between the dispatch adapter
//! and the handlers.

use crate::errors::AppError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const ALLOWED_HEADERS: &str = "Content-Type, X-User-Id";
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// HTTP methods the handlers distinguish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Options,
    Other(String),
}

impl HttpMethod {
    /// Exact, case-sensitive match on the upper-case method name.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            other => HttpMethod::Other(other.to_string()),
        }
    }
}

/// Request as handed over by the dispatch adapter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRequest {
    /// Defaults to `GET` when absent.
    #[serde(default)]
    pub http_method: Option<String>,
    /// JSON document as text.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub path_params: Option<HashMap<String, String>>,
}

impl HandlerRequest {
    pub fn new(method: &str) -> Self {
        Self {
            http_method: Some(method.to_string()),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_path_id(mut self, id: impl Into<String>) -> Self {
        self.path_params
            .get_or_insert_with(HashMap::new)
            .insert("id".to_string(), id.into());
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query_string_parameters
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn method(&self) -> HttpMethod {
        HttpMethod::parse(self.http_method.as_deref().unwrap_or("GET"))
    }

    /// The `id` path parameter; an empty value counts as absent.
    pub fn path_id(&self) -> Option<&str> {
        self.path_params
            .as_ref()
            .and_then(|params| params.get("id"))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// A query-string parameter; an empty value counts as absent.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_string_parameters
            .as_ref()
            .and_then(|params| params.get(key))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Parses the body as `T`. A missing or blank body reads as `{}`.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let raw = match self.body.as_deref() {
            Some(body) if !body.trim().is_empty() => body,
            _ => "{}",
        };
        Ok(serde_json::from_str(raw)?)
    }
}

/// Parses a path identifier into a row id.
pub fn parse_id(raw: &str, resource: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} id: {}", resource, raw)))
}

/// Response envelope returned by every handler branch.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl HandlerResponse {
    /// JSON response with the standard content-type and origin headers.
    pub fn json<T: Serialize>(status_code: u16, payload: &T) -> Result<Self, AppError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| AppError::InternalError(format!("Failed to serialize response: {}", e)))?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string());
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());

        Ok(Self {
            status_code,
            headers,
            body,
            is_base64_encoded: false,
        })
    }

    /// `{"error": message}` with the given status.
    pub fn error(status_code: u16, message: impl Into<String>) -> Result<Self, AppError> {
        Self::json(status_code, &json!({ "error": message.into() }))
    }

    /// Answer to a CORS preflight; `methods` is the advertised method list.
    pub fn preflight(methods: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        headers.insert("Access-Control-Allow-Methods".to_string(), methods.to_string());
        headers.insert("Access-Control-Allow-Headers".to_string(), ALLOWED_HEADERS.to_string());
        headers.insert("Access-Control-Max-Age".to_string(), PREFLIGHT_MAX_AGE.to_string());

        Self {
            status_code: 200,
            headers,
            body: String::new(),
            is_base64_encoded: false,
        }
    }

    /// Parses the body back into `T`. Mostly useful to callers and tests.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Per-call metadata supplied by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    pub request_id: String,
    pub function_name: String,
    /// Authenticated caller; owner of anything this call creates.
    pub user_id: i64,
}

impl InvocationContext {
    /// Context with a fresh request id.
    pub fn new(function_name: &str, user_id: i64) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            function_name: function_name.to_string(),
            user_id,
        }
    }
}
