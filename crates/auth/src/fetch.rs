//! HTTP plumbing shared by every call the session manager makes

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::error::AuthError;

/// A replayable description of one API call.
///
/// Requests are kept as data rather than as a `reqwest::RequestBuilder` so
/// the same call can be sent a second time with a renewed access token.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a JSON body to the request
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, AuthError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Sends [`ApiRequest`]s against the configured base URL
#[derive(Debug, Clone)]
pub(crate) struct Fetch {
    client: Client,
    base_url: String,
}

impl Fetch {
    pub fn new(client: Client, base_url: &str) -> Result<Self, AuthError> {
        // validate once so every later join is well-formed
        Url::parse(base_url)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, request: &ApiRequest) -> Result<Url, AuthError> {
        let path = request.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Send the request, optionally with bearer authentication.
    ///
    /// The response is returned whatever its status; callers decide how to
    /// treat failures.
    pub async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<Response, AuthError> {
        let url = self.url(request)?;
        let mut builder = self.client.request(request.method.clone(), url);

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }
}

/// Error message from a failed response body, if the service sent one.
///
/// The service answers `{"error": "..."}`; `message` is accepted as well.
pub fn remote_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}

/// Status and message of a rejected response, consuming its body
pub(crate) async fn rejection(response: Response, default_message: &str) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = remote_message(&body).unwrap_or_else(|| default_message.to_string());
    (status, message)
}

/// Turn a non-success response into `AuthError::Api`
pub(crate) async fn failure(response: Response, default_message: &str) -> AuthError {
    let (status, message) = rejection(response, default_message).await;
    AuthError::Api { status, message }
}

/// Parse a successful response, or convert a failed one
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    default_message: &str,
) -> Result<T, AuthError> {
    if !response.status().is_success() {
        return Err(failure(response, default_message).await);
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        // some endpoints answer 200/204 without a body
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn is_unauthorized(response: &Response) -> bool {
    response.status() == StatusCode::UNAUTHORIZED
}
