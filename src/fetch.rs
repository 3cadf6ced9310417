//! HTTP request helper shared by the auth and PostgREST clients

use reqwest::{header::{HeaderMap, HeaderValue}, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::Error;

/// Value sent in the `X-Client-Info` header
pub const CLIENT_INFO: &str = concat!("bookmark-sync/", env!("CARGO_PKG_VERSION"));

/// Helper for building and executing HTTP requests
pub struct FetchBuilder<'a> {
    client: &'a Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    on_status_error: fn(String) -> Error,
    // first header whose value was rejected; the request is not sent
    invalid_header: Option<&'static str>,
}

impl<'a> FetchBuilder<'a> {
    /// Create a new FetchBuilder
    pub fn new(client: &'a Client, url: &str, method: Method) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("X-Client-Info", HeaderValue::from_static(CLIENT_INFO));

        Self {
            client,
            url: url.to_string(),
            method,
            headers,
            query_params: Vec::new(),
            body: None,
            on_status_error: Error::Database,
            invalid_header: None,
        }
    }

    /// Add a header to the request.
    ///
    /// A value that is not a valid header value makes the request fail with
    /// [`Error::InvalidHeader`] instead of being sent without it.
    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                warn!(header = name, url = %self.url, "invalid header value");
                self.invalid_header.get_or_insert(name);
            }
        }
        self
    }

    /// Add bearer token authentication to the request
    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", &format!("Bearer {}", token))
    }

    /// Add query parameters to the request
    pub fn query(mut self, params: &[(String, String)]) -> Self {
        self.query_params.extend(params.iter().cloned());
        self
    }

    /// Add a JSON body to the request
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(body)?;
        self.body = Some(json);
        Ok(self)
    }

    /// Choose the error variant produced for non-success statuses
    pub fn map_status_error(mut self, f: fn(String) -> Error) -> Self {
        self.on_status_error = f;
        self
    }

    /// Build the request
    fn build(&self) -> Result<RequestBuilder, Error> {
        if let Some(name) = self.invalid_header {
            return Err(Error::InvalidHeader(name.to_string()));
        }

        let mut url = Url::parse(&self.url)?;

        if !self.query_params.is_empty() {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                query_pairs.append_pair(key, value);
            }
        }

        trace!(method = %self.method, url = %url, "building request");
        let mut req = self.client.request(self.method.clone(), url.as_str());
        req = req.headers(self.headers.clone());

        if let Some(body) = &self.body {
            req = req.body(body.clone());
        }

        Ok(req)
    }

    /// Execute the request and parse the response as JSON
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let response = self.execute_checked().await?;
        let result = response.json::<T>().await?;
        Ok(result)
    }

    /// Execute the request, failing on non-success statuses
    pub async fn execute_checked(&self) -> Result<reqwest::Response, Error> {
        let response = self.execute_raw().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            debug!(%status, url = %self.url, "request failed");
            return Err((self.on_status_error)(format!(
                "Request failed with status {}: {}",
                status, text
            )));
        }

        Ok(response)
    }

    /// Execute the request and return the raw response
    pub async fn execute_raw(&self) -> Result<reqwest::Response, Error> {
        let req = self.build()?;
        req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(e)
            }
        })
    }
}

/// Helper for creating HTTP requests
pub struct Fetch;

impl Fetch {
    /// Create a GET request
    pub fn get<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::GET)
    }

    /// Create a POST request
    pub fn post<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::POST)
    }

    /// Create a DELETE request
    pub fn delete<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::DELETE)
    }
}
