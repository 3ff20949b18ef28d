// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::time::Duration;

use async_trait::async_trait;
use protocol::{JobStatus, SubmitRequest, SubmitResponse, WorkerEntry};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// The three service operations the client relies on.
///
/// Implementations translate http outcomes into `Result` values; parsing
/// failures come back as [`TransportError::Malformed`] carrying the raw body.
#[async_trait]
pub trait HordeTransport: Send + Sync {
    /// `POST generate/text/async`. error-shaped bodies are returned as
    /// `Ok` with `id == None` so the caller can log them.
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, TransportError>;

    /// `GET generate/text/status/{id}`.
    async fn status(&self, id: &str) -> Result<JobStatus, TransportError>;

    /// `GET workers?type=text`.
    async fn workers(&self) -> Result<Vec<WorkerEntry>, TransportError>;
}

/// reqwest-backed transport talking json over https.
pub struct HttpTransport {
    base_url: Url,
    apikey: String,
    client_agent: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// `base_url` is the api root, e.g. `https://aihorde.net/api/v2`.
    pub fn new(
        base_url: &str,
        apikey: impl Into<String>,
        client_agent: impl Into<String>,
    ) -> Result<Self, TransportError> {
        // a trailing slash makes `join` append instead of replacing the
        // last path segment
        let mut root = base_url.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: Url::parse(&root)?,
            apikey: apikey.into(),
            client_agent: client_agent.into(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path)?)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        debug!("client::transport: GET {}", url);
        self.http
            .get(url)
            .header("apikey", &self.apikey)
            .header("Client-Agent", &self.client_agent)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        debug!("client::transport: POST {}", url);
        self.http
            .post(url)
            .header("apikey", &self.apikey)
            .header("Client-Agent", &self.client_agent)
    }
}

/// read the body as text first so that it is available for diagnostics
/// when it does not deserialize.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| TransportError::Malformed {
        status,
        reason: e.to_string(),
        body,
    })
}

#[async_trait]
impl HordeTransport for HttpTransport {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, TransportError> {
        let url = self.endpoint("generate/text/async")?;
        let response = self.post(url).json(request).send().await?;
        read_json(response).await
    }

    async fn status(&self, id: &str) -> Result<JobStatus, TransportError> {
        let url = self.endpoint(&format!("generate/text/status/{id}"))?;
        let response = self.get(url).send().await?;
        read_json(response).await
    }

    async fn workers(&self) -> Result<Vec<WorkerEntry>, TransportError> {
        let mut url = self.endpoint("workers")?;
        url.query_pairs_mut().append_pair("type", "text");
        let response = self.get(url).send().await?;
        read_json(response).await
    }
}
