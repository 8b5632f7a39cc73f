pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};
pub use config::TomlConfig;

pub use crate::core::archive::{
    nhgis_list_files, read_nhgis, read_nhgis_shp, read_nhgis_text, select_single_file,
    NhgisTable, ShapeTable,
};
pub use crate::core::client::NhgisApiClient;
pub use crate::core::poll::{wait_for_extract, PollOptions};
pub use crate::domain::model::{
    BreakdownLayout, DataFormat, DatasetSpec, DownloadLink, DownloadLinks, ExtractInfo,
    ExtractRef, ExtractStatus, MetadataQuery, MetadataType, NhgisExtract, TimeSeriesTableSpec,
    TstLayout,
};
pub use crate::domain::ports::{ConfigProvider, ExtractService};
pub use crate::utils::error::{NhgisError, Result};
