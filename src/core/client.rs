use crate::core::poll::{wait_for_extract, PollOptions};
use crate::domain::model::{
    ExtractInfo, ExtractRef, ExtractStatus, MetadataQuery, NhgisExtract, Page, NHGIS_COLLECTION,
};
use crate::domain::ports::{
    ConfigProvider, ExtractService, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_METADATA_URL,
    DEFAULT_NUM_RETRIES, DEFAULT_PAGE_SIZE, DEFAULT_RETRY_DELAY_MS,
};
use crate::utils::error::{NhgisError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_required_field, validate_url};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn stream_into_place(mut response: Response, part: &Path, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(part, path).await?;
    Ok(written)
}

/// Client for the IPUMS extract and NHGIS metadata APIs.
#[derive(Debug, Clone)]
pub struct NhgisApiClient {
    client: Client,
    api_key: String,
    base_url: String,
    metadata_url: String,
    api_version: u32,
    num_retries: u32,
    retry_delay: Duration,
    page_size: usize,
}

impl NhgisApiClient {
    /// A client against the public IPUMS endpoints.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        validate_non_empty_string("api_key", &api_key)?;

        Ok(Self {
            client: build_http_client()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            api_version: DEFAULT_API_VERSION,
            num_retries: DEFAULT_NUM_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn from_config<C: ConfigProvider + ?Sized>(config: &C) -> Result<Self> {
        let api_key = *validate_required_field("api_key", &config.api_key())?;
        validate_non_empty_string("api_key", api_key)?;
        validate_url("base_url", config.base_url())?;
        validate_url("metadata_url", config.metadata_url())?;

        Ok(Self {
            client: build_http_client()?,
            api_key: api_key.to_string(),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            metadata_url: config.metadata_url().trim_end_matches('/').to_string(),
            api_version: config.api_version(),
            num_retries: config.num_retries(),
            retry_delay: config.retry_delay(),
            page_size: config.page_size(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    fn extract_params(&self, collection: &str) -> Vec<(&'static str, String)> {
        vec![
            ("collection", collection.to_string()),
            ("version", self.api_version.to_string()),
        ]
    }

    fn metadata_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.api_version.to_string()),
            ("pageNumber", "1".to_string()),
            ("pageSize", self.page_size.to_string()),
        ]
    }

    /// Sends the request, retrying connection failures and 429/5xx answers.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match build()
                .header(AUTHORIZATION, self.api_key.as_str())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    NhgisError::HttpStatus { status, body }
                }
                Err(e) => NhgisError::ApiError(e),
            };

            if !outcome.is_retryable() || attempt >= self.num_retries {
                return Err(outcome);
            }

            attempt += 1;
            let delay = self.retry_delay * attempt;
            tracing::warn!(
                "Request failed ({}), retry {}/{} in {:?}",
                outcome,
                attempt,
                self.num_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self
            .send_with_retry(|| self.client.get(url).query(params))
            .await?;
        Ok(response.json().await?)
    }

    /// Extracts submitted recently, newest first.
    pub async fn get_previous_extracts(&self, limit: usize) -> Result<Vec<ExtractInfo>> {
        let mut params = self.extract_params(NHGIS_COLLECTION);
        params.push(("pageSize", limit.to_string()));

        let page: Page<ExtractInfo> = self.get_json(&self.base_url, &params).await?;
        tracing::debug!("Fetched {} previous extracts", page.data.len());
        Ok(page.data)
    }

    /// The stored definition of a submitted extract, ready to be submitted again.
    pub async fn get_extract_definition(&self, extract: &ExtractRef) -> Result<NhgisExtract> {
        let info = self.get_extract_info(extract).await?;
        let definition = info
            .extract_definition
            .ok_or_else(|| NhgisError::ValidationError {
                message: format!("{} has no extract definition", extract),
            })?;
        NhgisExtract::from_definition(&definition)
    }

    /// Downloads the table and GIS archives of a completed extract into
    /// `download_dir`, which must already exist.
    pub async fn download_extract(
        &self,
        extract: &ExtractRef,
        download_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if !download_dir.is_dir() {
            return Err(NhgisError::DownloadDirMissing {
                path: download_dir.display().to_string(),
            });
        }

        match self.extract_status(extract).await? {
            ExtractStatus::Completed => {}
            ExtractStatus::NotFound => {
                return Err(NhgisError::ExtractNotFound {
                    collection: extract.collection.clone(),
                    number: extract.number,
                })
            }
            ExtractStatus::Failed => {
                return Err(NhgisError::ExtractFailed {
                    collection: extract.collection.clone(),
                    number: extract.number,
                    status: ExtractStatus::Failed.to_string(),
                })
            }
            other => {
                return Err(NhgisError::ExtractNotReady {
                    collection: extract.collection.clone(),
                    number: extract.number,
                    status: other.to_string(),
                })
            }
        }

        let info = self.get_extract_info(extract).await?;
        let archives = info.download_links.archives();
        if archives.is_empty() {
            return Err(NhgisError::ExtractExpired {
                collection: extract.collection.clone(),
                number: extract.number,
            });
        }

        let mut downloaded = Vec::with_capacity(archives.len());
        for link in archives {
            let file_name = link.file_name().ok_or_else(|| NhgisError::ValidationError {
                message: format!("download link has no file name: {}", link.url),
            })?;
            let path = download_dir.join(file_name);
            let bytes = self.download_file(&link.url, &path).await?;
            tracing::info!("Downloaded {} ({} bytes)", path.display(), bytes);
            downloaded.push(path);
        }

        Ok(downloaded)
    }

    /// Streams `url` into a `.part` file next to `path` and renames it into
    /// place once complete, so a failed transfer leaves no partial archive.
    async fn download_file(&self, url: &str, path: &Path) -> Result<u64> {
        tracing::debug!("Streaming {} to {}", url, path.display());
        let response = self.send_with_retry(|| self.client.get(url)).await?;

        let part = part_path(path);
        let result = stream_into_place(response, &part, path).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&part).await {
                tracing::debug!("Could not remove {}: {}", part.display(), e);
            }
        }
        result
    }

    /// Queries the NHGIS metadata API.
    ///
    /// Collection queries follow `links.nextPage` and return every record as
    /// one JSON array; the other queries return the single response body.
    pub async fn nhgis_metadata(&self, query: &MetadataQuery) -> Result<Value> {
        let url = format!("{}/{}", self.metadata_url, query.path());
        let params = self.metadata_params();

        if !query.is_paginated() {
            return self.get_json(&url, &params).await;
        }

        let first: Page<Value> = self.get_json(&url, &params).await?;
        let mut data = first.data;
        let mut next_page = first.links.next_page;
        let mut pages = 1;

        while let Some(next) = next_page {
            let next_url = self.with_default_params(&next)?;
            let page: Page<Value> = self.get_json(&next_url, &[]).await?;
            data.extend(page.data);
            next_page = page.links.next_page;
            pages += 1;
        }

        tracing::debug!("Fetched {} {} records over {} pages", data.len(), query.path(), pages);
        Ok(Value::Array(data))
    }

    /// `nextPage` links normally carry their own query; fill in whatever is missing.
    fn with_default_params(&self, link: &str) -> Result<String> {
        let mut url = Url::parse(link)?;
        let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in self.metadata_params() {
                if key != "pageNumber" && !present.iter().any(|p| p == key) {
                    pairs.append_pair(key, &value);
                }
            }
        }

        Ok(url.to_string())
    }

    pub async fn wait_for_extract(
        &self,
        extract: &ExtractRef,
        options: &PollOptions,
    ) -> Result<ExtractStatus> {
        wait_for_extract(self, extract, options).await
    }
}

fn build_http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("nhgis-client/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[async_trait]
impl ExtractService for NhgisApiClient {
    async fn submit_extract(&self, extract: &NhgisExtract) -> Result<ExtractRef> {
        let body = extract.build()?;
        let params = self.extract_params(extract.collection());
        tracing::debug!("Submitting extract: {}", body);

        let response = self
            .send_with_retry(|| self.client.post(&self.base_url).query(&params).json(&body))
            .await?;
        let info: ExtractInfo = response.json().await?;

        let submitted = ExtractRef::new(extract.collection(), info.number)?;
        tracing::info!("Submitted {} (status: {})", submitted, info.status);
        Ok(submitted)
    }

    async fn extract_status(&self, extract: &ExtractRef) -> Result<ExtractStatus> {
        match self.get_extract_info(extract).await {
            Ok(info) => Ok(info.status),
            Err(NhgisError::HttpStatus { status: 404, .. }) => Ok(ExtractStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn get_extract_info(&self, extract: &ExtractRef) -> Result<ExtractInfo> {
        let url = format!("{}/{}", self.base_url, extract.number);
        self.get_json(&url, &self.extract_params(&extract.collection))
            .await
    }
}
