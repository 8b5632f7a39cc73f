use thiserror::Error;

#[derive(Error, Debug)]
pub enum NhgisError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Shapefile error: {0}")]
    ShapefileError(#[from] shapefile::Error),

    #[error("dBase error: {0}")]
    DbaseError(#[from] shapefile::dbase::Error),

    #[error("Invalid file pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("IPUMS API returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error(
        "There is no IPUMS extract with extract number {number} in collection {collection}. \
         Be sure to submit your extract before trying to download it!"
    )]
    ExtractNotFound { collection: String, number: u64 },

    #[error("Your IPUMS {collection} extract number {number} failed to complete (status: {status})")]
    ExtractFailed {
        collection: String,
        number: u64,
        status: String,
    },

    #[error("Your IPUMS {collection} extract number {number} is not finished yet (status: {status})")]
    ExtractNotReady {
        collection: String,
        number: u64,
        status: String,
    },

    #[error("IPUMS {collection} extract {number} has expired and its files have been deleted")]
    ExtractExpired { collection: String, number: u64 },

    #[error("\"{name}\" is not a valid metadata endpoint")]
    InvalidMetadataType { name: String },

    #[error("No files matching pattern \"{pattern}\" were found. Available files:\n{available}")]
    NoMatchingFiles { pattern: String, available: String },

    #[error("Multiple files selected. Available files:\n{available}")]
    MultipleFilesSelected { available: String },

    #[error("{path} does not exist")]
    DownloadDirMissing { path: String },

    #[error("Timed out after {seconds}s waiting for {collection} extract {number}")]
    PollTimeout {
        collection: String,
        number: u64,
        seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Extract,
    Archive,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl NhgisError {
    pub fn config(message: impl Into<String>) -> Self {
        NhgisError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NhgisError::ApiError(_) | NhgisError::HttpStatus { .. } | NhgisError::UrlError(_) => {
                ErrorCategory::Network
            }
            NhgisError::ConfigError { .. }
            | NhgisError::MissingConfigError { .. }
            | NhgisError::InvalidConfigValueError { .. }
            | NhgisError::ValidationError { .. }
            | NhgisError::InvalidMetadataType { .. } => ErrorCategory::Configuration,
            NhgisError::ExtractNotFound { .. }
            | NhgisError::ExtractFailed { .. }
            | NhgisError::ExtractNotReady { .. }
            | NhgisError::ExtractExpired { .. }
            | NhgisError::PollTimeout { .. } => ErrorCategory::Extract,
            NhgisError::ZipError(_)
            | NhgisError::CsvError(_)
            | NhgisError::ShapefileError(_)
            | NhgisError::DbaseError(_)
            | NhgisError::PatternError(_)
            | NhgisError::NoMatchingFiles { .. }
            | NhgisError::MultipleFilesSelected { .. } => ErrorCategory::Archive,
            NhgisError::IoError(_)
            | NhgisError::SerializationError(_)
            | NhgisError::DownloadDirMissing { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 稍後重試即可
            NhgisError::ExtractNotReady { .. } | NhgisError::PollTimeout { .. } => {
                ErrorSeverity::Medium
            }
            NhgisError::ApiError(_) => ErrorSeverity::Medium,
            NhgisError::HttpStatus { status, .. } if *status >= 500 || *status == 429 => {
                ErrorSeverity::Medium
            }
            NhgisError::IoError(_) | NhgisError::SerializationError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            NhgisError::ApiError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            NhgisError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            NhgisError::HttpStatus { status: 401, .. } | NhgisError::HttpStatus { status: 403, .. } => {
                "Check that IPUMS_API_KEY holds a valid key from https://account.ipums.org/api_keys"
            }
            NhgisError::ApiError(_) | NhgisError::HttpStatus { .. } => {
                "Check your network connection and retry; the IPUMS API may be temporarily unavailable"
            }
            NhgisError::MissingConfigError { .. } => {
                "Provide the missing value on the command line, in the TOML file or through the environment"
            }
            NhgisError::ConfigError { .. }
            | NhgisError::InvalidConfigValueError { .. }
            | NhgisError::ValidationError { .. } => "Fix the configuration value and run again",
            NhgisError::InvalidMetadataType { .. } => {
                "Use one of: datasets, data_tables, time_series_tables, shapefiles"
            }
            NhgisError::ExtractNotFound { .. } => "Submit the extract before checking or downloading it",
            NhgisError::ExtractFailed { .. } => {
                "Resubmit the extract; if the issue lingers, contact ipums@umn.edu"
            }
            NhgisError::ExtractNotReady { .. } | NhgisError::PollTimeout { .. } => {
                "Wait for the extract to complete, for example with `nhgis wait <number>`"
            }
            NhgisError::ExtractExpired { .. } => {
                "Resubmit the extract definition as a new extract request"
            }
            NhgisError::NoMatchingFiles { .. } | NhgisError::MultipleFilesSelected { .. } => {
                "Pick a pattern that matches exactly one of the listed files"
            }
            NhgisError::PatternError(_) => "Check the regular expression syntax of the file pattern",
            NhgisError::DownloadDirMissing { .. } => "Create the download directory first",
            NhgisError::ZipError(_) | NhgisError::CsvError(_) => {
                "The archive may be incomplete; download the extract again"
            }
            NhgisError::ShapefileError(_) | NhgisError::DbaseError(_) => {
                "Make sure the selected file is a shapefile bundle (.shp with its .dbf)"
            }
            NhgisError::UrlError(_) => "Check the configured API URLs",
            NhgisError::IoError(_) | NhgisError::SerializationError(_) => {
                "Check file permissions and available disk space"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not talk to the IPUMS API: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Extract => self.to_string(),
            ErrorCategory::Archive => format!("Could not read the extract archive: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, NhgisError>;
