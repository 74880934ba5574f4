use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::Duration;

const USER_AGENT: &str = "atlas-agent/0.0";

// Payloads this small are cheaper to send raw than to compress.
const MIN_SIZE_TO_GZIP: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("failed to compress request payload")]
    Compress(#[source] std::io::Error),
}

/// Outcome of a conditional GET.
#[derive(Debug)]
pub struct GetResponse {
    pub status: u16,
    pub body: String,
    pub etag: Option<String>,
}

/// Thin wrapper over the shared HTTP client: JSON POSTs with gzip bodies
/// and ETag-aware conditional GETs. The connect timeout is bound at
/// construction; the read timeout applies per request.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .expect("http client construction cannot fail with static options");
        HttpClient { client }
    }

    /// POST a JSON payload, gzipping it when above the size threshold.
    /// Returns the response status; transport failures log and report 0.
    pub async fn post_json(
        &self,
        url: &str,
        read_timeout: Duration,
        payload: Vec<u8>,
    ) -> u16 {
        match self.try_post_json(url, read_timeout, payload).await {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(url, %err, "failed to POST");
                0
            }
        }
    }

    async fn try_post_json(
        &self,
        url: &str,
        read_timeout: Duration,
        payload: Vec<u8>,
    ) -> Result<u16, HttpError> {
        let mut request = self
            .client
            .post(url)
            .timeout(read_timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if payload.len() > MIN_SIZE_TO_GZIP {
            request = request
                .header(reqwest::header::CONTENT_ENCODING, "gzip")
                .body(compress(&payload).map_err(HttpError::Compress)?);
        } else {
            request = request.body(payload);
        }

        let response = request.send().await?;
        Ok(response.status().as_u16())
    }

    /// POST with an empty body, used for the fire-and-forget alert-server
    /// notification.
    pub async fn post_empty(&self, url: &str, read_timeout: Duration) -> u16 {
        let result = self
            .client
            .post(url)
            .timeout(read_timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .send()
            .await;
        match result {
            Ok(response) => response.status().as_u16(),
            Err(err) => {
                tracing::debug!(url, %err, "failed to POST notification");
                0
            }
        }
    }

    /// GET with `If-None-Match` when an ETag from a previous fetch is
    /// available. A `304` reports an empty body; the returned ETag, if
    /// any, should be carried into the next call.
    pub async fn conditional_get(
        &self,
        url: &str,
        etag: Option<&str>,
        read_timeout: Duration,
    ) -> Result<GetResponse, HttpError> {
        let mut request = self.client.get(url).timeout(read_timeout);
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned());
        let body = response.text().await.unwrap_or_default();

        Ok(GetResponse { status, body, etag })
    }
}

fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Gzip a JSON payload to a file, used for the dump-metrics debug paths.
pub fn dump_gzipped(path: &std::path::Path, payload: &[u8]) {
    let write = || -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()?;
        Ok(())
    };
    if let Err(err) = write() {
        tracing::error!(path = %path.display(), %err, "unable to write compressed file");
    }
}
