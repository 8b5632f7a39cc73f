use crate::domain::model::{ExtractInfo, ExtractRef, ExtractStatus, NhgisExtract};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.ipums.org/extracts";
pub const DEFAULT_METADATA_URL: &str = "https://api.ipums.org/metadata/nhgis";
pub const DEFAULT_API_VERSION: u32 = 2;
pub const DEFAULT_NUM_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 2500;

pub trait ConfigProvider: Send + Sync {
    fn api_key(&self) -> Option<&str>;
    fn base_url(&self) -> &str;
    fn metadata_url(&self) -> &str;
    fn api_version(&self) -> u32;
    fn num_retries(&self) -> u32;

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(DEFAULT_RETRY_DELAY_MS)
    }

    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }
}

/// The part of the extract API the poller needs.
#[async_trait]
pub trait ExtractService: Send + Sync {
    async fn submit_extract(&self, extract: &NhgisExtract) -> Result<ExtractRef>;
    async fn extract_status(&self, extract: &ExtractRef) -> Result<ExtractStatus>;
    async fn get_extract_info(&self, extract: &ExtractRef) -> Result<ExtractInfo>;
}
