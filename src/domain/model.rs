use crate::utils::error::{NhgisError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const NHGIS_COLLECTION: &str = "nhgis";
pub const DEFAULT_DESCRIPTION: &str = "My IPUMS NHGIS Extract";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    #[default]
    CsvNoHeader,
    CsvHeader,
    FixedWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownLayout {
    #[default]
    SingleFile,
    SeparateFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TstLayout {
    #[default]
    TimeByColumnLayout,
    TimeByRowLayout,
    TimeByFileLayout,
}

/// Tables and geographic levels requested from one NHGIS dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    #[serde(alias = "data_tables")]
    pub data_tables: Vec<String>,
    #[serde(alias = "geog_levels")]
    pub geog_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<Vec<String>>,
    #[serde(
        default,
        alias = "breakdown_values",
        skip_serializing_if = "Option::is_none"
    )]
    pub breakdown_values: Option<Vec<String>>,
}

impl DatasetSpec {
    pub fn new<T, G>(data_tables: T, geog_levels: G) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            data_tables: data_tables.into_iter().map(Into::into).collect(),
            geog_levels: geog_levels.into_iter().map(Into::into).collect(),
            years: None,
            breakdown_values: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesTableSpec {
    #[serde(alias = "geog_levels")]
    pub geog_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<Vec<String>>,
}

impl TimeSeriesTableSpec {
    pub fn new<G>(geog_levels: G) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            geog_levels: geog_levels.into_iter().map(Into::into).collect(),
            years: None,
        }
    }
}

/// An NHGIS extract request.
///
/// Field names are snake_case so the request can be written directly in a
/// TOML file; [`NhgisExtract::build`] produces the camelCase body the API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NhgisExtract {
    pub datasets: Option<BTreeMap<String, DatasetSpec>>,
    pub time_series_tables: Option<BTreeMap<String, TimeSeriesTableSpec>>,
    pub shapefiles: Vec<String>,
    pub geographic_extents: Option<Vec<String>>,
    pub breakdown_and_data_type_layout: BreakdownLayout,
    pub tst_layout: TstLayout,
    pub description: String,
    pub data_format: DataFormat,
}

impl Default for NhgisExtract {
    fn default() -> Self {
        Self {
            datasets: None,
            time_series_tables: None,
            shapefiles: Vec::new(),
            geographic_extents: None,
            breakdown_and_data_type_layout: BreakdownLayout::default(),
            tst_layout: TstLayout::default(),
            description: DEFAULT_DESCRIPTION.to_string(),
            data_format: DataFormat::default(),
        }
    }
}

impl NhgisExtract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self) -> &'static str {
        NHGIS_COLLECTION
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dataset(mut self, name: impl Into<String>, spec: DatasetSpec) -> Self {
        self.datasets
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), spec);
        self
    }

    pub fn with_time_series_table(
        mut self,
        name: impl Into<String>,
        spec: TimeSeriesTableSpec,
    ) -> Self {
        self.time_series_tables
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), spec);
        self
    }

    pub fn with_shapefile(mut self, name: impl Into<String>) -> Self {
        self.shapefiles.push(name.into());
        self
    }

    pub fn with_geographic_extents<I>(mut self, extents: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.geographic_extents = Some(extents.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn with_breakdown_layout(mut self, layout: BreakdownLayout) -> Self {
        self.breakdown_and_data_type_layout = layout;
        self
    }

    pub fn with_tst_layout(mut self, layout: TstLayout) -> Self {
        self.tst_layout = layout;
        self
    }

    /// The JSON body submitted to the extract endpoint.
    ///
    /// Dataset options are only sent alongside datasets, and the time series
    /// layout only alongside time series tables.
    pub fn build(&self) -> Result<Value> {
        let mut body = json!({
            "description": self.description,
            "collection": self.collection(),
            "shapefiles": self.shapefiles,
        });
        let map = body
            .as_object_mut()
            .ok_or_else(|| NhgisError::config("extract body is not a JSON object"))?;

        if let Some(datasets) = &self.datasets {
            map.insert("datasets".to_string(), serde_json::to_value(datasets)?);
            map.insert("dataFormat".to_string(), serde_json::to_value(self.data_format)?);
            map.insert(
                "breakdownAndDataTypeLayout".to_string(),
                serde_json::to_value(self.breakdown_and_data_type_layout)?,
            );

            if let Some(extents) = &self.geographic_extents {
                map.insert("geographicExtents".to_string(), serde_json::to_value(extents)?);
            }
        }

        if let Some(tsts) = &self.time_series_tables {
            map.insert("timeSeriesTables".to_string(), serde_json::to_value(tsts)?);
            map.insert(
                "timeSeriesTableLayout".to_string(),
                serde_json::to_value(self.tst_layout)?,
            );
        }

        Ok(body)
    }

    /// Rebuilds a request from the `extractDefinition` the API echoes back,
    /// so an expired extract can be submitted again.
    pub fn from_definition(definition: &Value) -> Result<Self> {
        let api: ApiDefinition = serde_json::from_value(definition.clone())?;

        if let Some(collection) = api.collection.as_deref() {
            if collection != NHGIS_COLLECTION {
                return Err(NhgisError::ValidationError {
                    message: format!("extract belongs to collection {}, not nhgis", collection),
                });
            }
        }

        Ok(Self {
            datasets: api.datasets,
            time_series_tables: api.time_series_tables,
            shapefiles: api.shapefiles.unwrap_or_default(),
            geographic_extents: api.geographic_extents,
            breakdown_and_data_type_layout: api.breakdown_and_data_type_layout.unwrap_or_default(),
            tst_layout: api.time_series_table_layout.unwrap_or_default(),
            description: api
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            data_format: api.data_format.unwrap_or_default(),
        })
    }

    fn requests_anything(&self) -> bool {
        self.datasets.as_ref().is_some_and(|d| !d.is_empty())
            || self.time_series_tables.as_ref().is_some_and(|t| !t.is_empty())
            || !self.shapefiles.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiDefinition {
    collection: Option<String>,
    description: Option<String>,
    datasets: Option<BTreeMap<String, DatasetSpec>>,
    time_series_tables: Option<BTreeMap<String, TimeSeriesTableSpec>>,
    shapefiles: Option<Vec<String>>,
    geographic_extents: Option<Vec<String>>,
    data_format: Option<DataFormat>,
    breakdown_and_data_type_layout: Option<BreakdownLayout>,
    time_series_table_layout: Option<TstLayout>,
}

impl Validate for NhgisExtract {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("extract.description", &self.description)?;

        if !self.requests_anything() {
            return Err(NhgisError::ValidationError {
                message: "an extract must request at least one dataset, time series table or shapefile"
                    .to_string(),
            });
        }

        for (name, spec) in self.datasets.iter().flatten() {
            if spec.data_tables.is_empty() || spec.geog_levels.is_empty() {
                return Err(NhgisError::ValidationError {
                    message: format!("dataset {} needs at least one data table and geog level", name),
                });
            }
        }

        for (name, spec) in self.time_series_tables.iter().flatten() {
            if spec.geog_levels.is_empty() {
                return Err(NhgisError::ValidationError {
                    message: format!("time series table {} needs at least one geog level", name),
                });
            }
        }

        Ok(())
    }
}

/// A submitted extract: its collection and the number the service assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractRef {
    pub collection: String,
    pub number: u64,
}

impl ExtractRef {
    pub fn nhgis(number: u64) -> Self {
        Self {
            collection: NHGIS_COLLECTION.to_string(),
            number,
        }
    }

    pub fn new(collection: impl Into<String>, number: u64) -> Result<Self> {
        let collection = collection.into();
        if collection.trim().is_empty() {
            return Err(NhgisError::MissingConfigError {
                field: "collection".to_string(),
            });
        }
        Ok(Self { collection, number })
    }
}

impl fmt::Display for ExtractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} extract {}", self.collection, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    Queued,
    Started,
    Produced,
    Canceled,
    Failed,
    Completed,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl ExtractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractStatus::Queued => "queued",
            ExtractStatus::Started => "started",
            ExtractStatus::Produced => "produced",
            ExtractStatus::Canceled => "canceled",
            ExtractStatus::Failed => "failed",
            ExtractStatus::Completed => "completed",
            ExtractStatus::NotFound => "not found",
            ExtractStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExtractStatus::Completed
                | ExtractStatus::Failed
                | ExtractStatus::Canceled
                | ExtractStatus::NotFound
        )
    }
}

impl fmt::Display for ExtractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl DownloadLink {
    /// Last path segment of the link, used as the local file name.
    pub fn file_name(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
            .or_else(|| self.url.rsplit('/').next().map(str::to_string))
            .filter(|name| !name.is_empty())
    }
}

/// Links are absent once an extract expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinks {
    #[serde(default)]
    pub table_data: Option<DownloadLink>,
    #[serde(default)]
    pub gis_data: Option<DownloadLink>,
    #[serde(default)]
    pub codebook_preview: Option<DownloadLink>,
}

impl DownloadLinks {
    /// Table data first, then GIS data.
    pub fn archives(&self) -> Vec<&DownloadLink> {
        self.table_data.iter().chain(self.gis_data.iter()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractInfo {
    pub number: u64,
    pub status: ExtractStatus,
    #[serde(default)]
    pub download_links: DownloadLinks,
    #[serde(default)]
    pub extract_definition: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLinks {
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub previous_page: Option<String>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PageLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataType {
    Datasets,
    DataTables,
    TimeSeriesTables,
    Shapefiles,
}

impl MetadataType {
    pub const ALL: [MetadataType; 4] = [
        MetadataType::Datasets,
        MetadataType::DataTables,
        MetadataType::TimeSeriesTables,
        MetadataType::Shapefiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Datasets => "datasets",
            MetadataType::DataTables => "data_tables",
            MetadataType::TimeSeriesTables => "time_series_tables",
            MetadataType::Shapefiles => "shapefiles",
        }
    }
}

impl FromStr for MetadataType {
    type Err = NhgisError;

    fn from_str(s: &str) -> Result<Self> {
        MetadataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| NhgisError::InvalidMetadataType {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataQuery {
    /// Every record of one metadata type, following pagination.
    Collection(MetadataType),
    Dataset {
        dataset: String,
        data_table: Option<String>,
    },
    TimeSeriesTable(String),
}

impl MetadataQuery {
    /// Path below the metadata root URL.
    pub fn path(&self) -> String {
        match self {
            MetadataQuery::Collection(kind) => kind.as_str().to_string(),
            MetadataQuery::Dataset {
                dataset,
                data_table: Some(table),
            } => format!("datasets/{}/data_tables/{}", dataset, table),
            MetadataQuery::Dataset {
                dataset,
                data_table: None,
            } => format!("datasets/{}", dataset),
            MetadataQuery::TimeSeriesTable(name) => format!("time_series_tables/{}", name),
        }
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, MetadataQuery::Collection(_))
    }
}
