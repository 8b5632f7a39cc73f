pub mod archive;
pub mod client;
pub mod poll;

pub use crate::domain::model::{ExtractInfo, ExtractRef, ExtractStatus, MetadataQuery, NhgisExtract};
pub use crate::domain::ports::{ConfigProvider, ExtractService};
pub use crate::utils::error::Result;
