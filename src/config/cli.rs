use crate::config::toml_config::ClientSection;
use crate::domain::model::{MetadataQuery, MetadataType};
use crate::domain::ports::{
    ConfigProvider, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_METADATA_URL,
    DEFAULT_NUM_RETRIES, DEFAULT_PAGE_SIZE, DEFAULT_RETRY_DELAY_MS,
};
use crate::utils::error::{NhgisError, Result};
use crate::utils::validation::{self, Validate};
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "nhgis")]
#[command(about = "Request, download and read NHGIS extracts through the IPUMS API")]
pub struct CliConfig {
    /// IPUMS API key
    #[arg(long, global = true, env = "IPUMS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[arg(long, global = true)]
    pub metadata_url: Option<String>,

    #[arg(long, global = true)]
    pub api_version: Option<u32>,

    #[arg(long, global = true)]
    pub num_retries: Option<u32>,

    #[arg(long, global = true)]
    pub retry_delay_ms: Option<u64>,

    /// Records per metadata page
    #[arg(long, global = true)]
    pub page_size: Option<usize>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit the extract defined in a TOML file
    Submit {
        #[arg(short, long, default_value = "nhgis-extract.toml")]
        config: String,

        /// Wait for the extract to complete
        #[arg(long)]
        wait: bool,

        /// Download the archives once complete (implies --wait)
        #[arg(long)]
        download_dir: Option<String>,

        /// Print the request body without submitting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the status of a submitted extract
    Status {
        number: u64,
        #[arg(long, default_value = "nhgis")]
        collection: String,
    },

    /// Poll until an extract completes
    Wait {
        number: u64,
        #[arg(long, default_value = "nhgis")]
        collection: String,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download the table and GIS archives of a completed extract
    Download {
        number: u64,
        #[arg(long, default_value = "nhgis")]
        collection: String,
        #[arg(short, long, default_value = ".")]
        dir: String,
    },

    /// Submit the definition of an earlier (possibly expired) extract again
    Resubmit {
        number: u64,
        #[arg(long, default_value = "nhgis")]
        collection: String,
    },

    /// List recently submitted extracts
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Query NHGIS metadata
    Metadata {
        /// datasets, data_tables, time_series_tables or shapefiles
        #[arg(long = "type", value_name = "TYPE", conflicts_with_all = ["dataset", "time_series_table"])]
        metadata_type: Option<String>,

        #[arg(long, conflicts_with = "time_series_table")]
        dataset: Option<String>,

        #[arg(long, requires = "dataset")]
        data_table: Option<String>,

        #[arg(long)]
        time_series_table: Option<String>,

        /// Write the JSON to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List the files inside an extract archive
    ListFiles {
        archive: String,
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Print the first rows of a CSV file inside an extract archive
    ReadCsv {
        archive: String,
        #[arg(short, long)]
        select: Option<String>,
        #[arg(long, default_value = "10")]
        head: usize,
    },

    /// Summarize a shapefile inside an extract archive
    ReadShp {
        archive: String,
        #[arg(short, long)]
        select: Option<String>,
    },

    /// Print a codebook inside an extract archive
    Codebook {
        archive: String,
        #[arg(short, long)]
        select: Option<String>,
    },
}

impl Command {
    /// Whether the command talks to the API (and so needs a key).
    pub fn needs_api(&self) -> bool {
        !matches!(
            self,
            Command::Submit { dry_run: true, .. }
                | Command::ListFiles { .. }
                | Command::ReadCsv { .. }
                | Command::ReadShp { .. }
                | Command::Codebook { .. }
        )
    }
}

pub fn metadata_query(
    metadata_type: Option<&str>,
    dataset: Option<&str>,
    data_table: Option<&str>,
    time_series_table: Option<&str>,
) -> Result<MetadataQuery> {
    if let Some(kind) = metadata_type {
        return Ok(MetadataQuery::Collection(kind.parse::<MetadataType>()?));
    }
    if let Some(dataset) = dataset {
        return Ok(MetadataQuery::Dataset {
            dataset: dataset.to_string(),
            data_table: data_table.map(str::to_string),
        });
    }
    if let Some(name) = time_series_table {
        return Ok(MetadataQuery::TimeSeriesTable(name.to_string()));
    }
    Err(NhgisError::MissingConfigError {
        field: "--type, --dataset or --time-series-table".to_string(),
    })
}

impl CliConfig {
    /// Fills settings not given on the command line from a TOML `[client]` section.
    pub fn merge_client_section(&mut self, client: &ClientSection) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }

        if self.api_key.is_none() {
            if let Some(key) = client.api_key.as_deref().filter(|k| !k.contains("${")) {
                self.api_key = Some(key.to_string());
            }
        }
        fill(&mut self.base_url, &client.base_url);
        fill(&mut self.metadata_url, &client.metadata_url);
        fill(&mut self.api_version, &client.api_version);
        fill(&mut self.num_retries, &client.num_retries);
        fill(&mut self.retry_delay_ms, &client.retry_delay_ms);
        fill(&mut self.page_size, &client.page_size);
    }
}

impl ConfigProvider for CliConfig {
    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn metadata_url(&self) -> &str {
        self.metadata_url.as_deref().unwrap_or(DEFAULT_METADATA_URL)
    }

    fn api_version(&self) -> u32 {
        self.api_version.unwrap_or(DEFAULT_API_VERSION)
    }

    fn num_retries(&self) -> u32 {
        self.num_retries.unwrap_or(DEFAULT_NUM_RETRIES)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS))
    }

    fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("base_url", self.base_url())?;
        validation::validate_url("metadata_url", self.metadata_url())?;
        validation::validate_positive_number("api_version", self.api_version() as usize, 1)?;
        validation::validate_range("num_retries", self.num_retries(), 0, 10)?;
        validation::validate_range("page_size", self.page_size(), 1, DEFAULT_PAGE_SIZE)?;

        match &self.command {
            Command::ListFiles { archive, .. }
            | Command::ReadCsv { archive, .. }
            | Command::ReadShp { archive, .. }
            | Command::Codebook { archive, .. } => {
                validation::validate_zip_archive("archive", archive)?;
            }
            Command::Download { dir, .. } => validation::validate_path("dir", dir)?,
            Command::Submit { config, .. } => validation::validate_path("config", config)?,
            Command::History { limit } => validation::validate_positive_number("limit", *limit, 1)?,
            _ => {}
        }

        if self.command.needs_api() {
            let api_key = self.api_key();
            validation::validate_required_field("api_key (IPUMS_API_KEY)", &api_key)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_status_command_needs_key() {
        let mut config = parse(&["nhgis", "status", "12"]);
        config.api_key = None;
        assert!(matches!(
            config.validate(),
            Err(NhgisError::MissingConfigError { .. })
        ));

        config.api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
        assert!(matches!(config.command, Command::Status { number: 12, .. }));
    }

    #[test]
    fn test_defaults_come_from_ports() {
        let config = parse(&["nhgis", "--api-key", "k", "history"]);
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.api_version(), 2);
        assert_eq!(config.num_retries(), 3);
    }

    #[test]
    fn test_toml_client_section_fills_gaps_only() {
        let mut config = parse(&["nhgis", "--num-retries", "0", "history"]);
        config.api_key = None;
        let section = ClientSection {
            api_key: Some("from-toml".to_string()),
            base_url: Some("http://localhost:9000/extracts".to_string()),
            num_retries: Some(5),
            ..ClientSection::default()
        };

        config.merge_client_section(&section);

        assert_eq!(config.api_key(), Some("from-toml"));
        assert_eq!(config.base_url(), "http://localhost:9000/extracts");
        assert_eq!(config.num_retries(), 0);
    }

    #[test]
    fn test_page_size_from_flag_or_toml() {
        let mut config = parse(&["nhgis", "--api-key", "k", "history"]);
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);

        config.merge_client_section(&ClientSection {
            page_size: Some(500),
            ..ClientSection::default()
        });
        assert_eq!(config.page_size(), 500);
        assert!(config.validate().is_ok());

        let mut config = parse(&["nhgis", "--page-size", "50", "--api-key", "k", "history"]);
        config.merge_client_section(&ClientSection {
            page_size: Some(500),
            ..ClientSection::default()
        });
        assert_eq!(config.page_size(), 50);

        config.page_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_query_selection() {
        assert_eq!(
            metadata_query(Some("shapefiles"), None, None, None).unwrap(),
            MetadataQuery::Collection(MetadataType::Shapefiles)
        );
        assert!(matches!(
            metadata_query(Some("geographies"), None, None, None),
            Err(NhgisError::InvalidMetadataType { .. })
        ));
        assert_eq!(
            metadata_query(None, Some("2020_DHCa"), Some("P1"), None).unwrap(),
            MetadataQuery::Dataset {
                dataset: "2020_DHCa".to_string(),
                data_table: Some("P1".to_string()),
            }
        );
        assert!(metadata_query(None, None, None, None).is_err());
    }

    #[test]
    fn test_dry_run_and_archive_commands_skip_the_api() {
        assert!(!parse(&["nhgis", "submit", "--dry-run"]).command.needs_api());
        assert!(parse(&["nhgis", "submit"]).command.needs_api());
        assert!(!parse(&["nhgis", "list-files", "x.zip"]).command.needs_api());
    }

    #[test]
    fn test_data_table_requires_dataset() {
        assert!(CliConfig::try_parse_from(["nhgis", "metadata", "--data-table", "P1"]).is_err());
    }
}
