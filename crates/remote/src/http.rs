//! HTTP implementation of the remote source.

use async_trait::async_trait;
use futures::TryStreamExt;
use replica_core::Datamodel;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ndjson;
use crate::source::{EventStream, RecordStream, RemoteSource, RemoteTransaction};
use crate::TransportError;

/// Path of the datamodel document.
pub const DATAMODEL_PATH: &str = "datamodel";
/// Path of the latest-transaction document.
pub const LAST_TRANSACTION_PATH: &str = "senestetransaktion";
/// Path of the snapshot download.
pub const DOWNLOAD_PATH: &str = "udtraek";
/// Path of the event stream.
pub const EVENTS_PATH: &str = "haendelser";

/// Remote source reached over HTTP.
///
/// Snapshot and event endpoints answer in NDJSON and are consumed as a
/// stream; nothing is buffered beyond the line being decoded.
#[derive(Debug, Clone)]
pub struct HttpRemoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(String, reqwest::Response), TransportError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }
        debug!("GET {} -> {}", url, status);
        Ok((url, response))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let (url, response) = self.get(path, &[]).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(|source| TransportError::Payload { url, source })
    }

    async fn get_ndjson<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<futures::stream::BoxStream<'static, Result<T, TransportError>>, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (url, response) = self.get(path, query).await?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(ndjson::decode(url, body))
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn datamodel(&self) -> Result<Datamodel, TransportError> {
        self.get_json(DATAMODEL_PATH).await
    }

    async fn last_transaction(&self) -> Result<RemoteTransaction, TransportError> {
        self.get_json(LAST_TRANSACTION_PATH).await
    }

    async fn download_stream(
        &self,
        entity: &str,
        txid: Option<i64>,
    ) -> Result<RecordStream, TransportError> {
        let mut query = vec![("entitet", entity.to_string())];
        if let Some(txid) = txid {
            query.push(("txid", txid.to_string()));
        }
        query.push(("ndjson", String::new()));
        self.get_ndjson(DOWNLOAD_PATH, &query).await
    }

    async fn event_stream(
        &self,
        entity: &str,
        from_txid: i64,
        to_txid: i64,
    ) -> Result<EventStream, TransportError> {
        let query = vec![
            ("entitet", entity.to_string()),
            ("txidfra", from_txid.to_string()),
            ("txidtil", to_txid.to_string()),
            ("ndjson", String::new()),
        ];
        self.get_ndjson(EVENTS_PATH, &query).await
    }
}
