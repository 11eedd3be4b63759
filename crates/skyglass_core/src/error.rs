use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(skyglass_core::configuration_error),
        help("Check configuration file at {config_path}\nExpected: {expected}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },

    #[error("Invalid store configuration: {reason}")]
    #[diagnostic(
        code(skyglass_core::invalid_store_config),
        help("capacity and column_count must both be at least 1, and column_count may not exceed capacity")
    )]
    InvalidStoreConfig {
        capacity: usize,
        column_count: usize,
        reason: String,
    },

    #[error("Transport error on {endpoint}: {operation} failed - {cause}")]
    #[diagnostic(
        code(skyglass_core::transport_error),
        help("Check the firehose endpoint and network connectivity")
    )]
    Transport {
        endpoint: String,
        operation: String,
        cause: String,
    },

    #[error("Invalid firehose endpoint '{input}'")]
    #[diagnostic(
        code(skyglass_core::invalid_endpoint),
        help("Use a host name or a ws://, wss://, http:// or https:// URL")
    )]
    InvalidEndpoint {
        input: String,
        #[source]
        cause: url::ParseError,
    },

    #[error("Record skipped: {reason}")]
    #[diagnostic(code(skyglass_core::record_decode))]
    RecordDecode { reason: String },

    #[error("JSON decoding error")]
    #[diagnostic(
        code(skyglass_core::json_decoding_error),
        help("Failed to decode JSON data for {data_type}")
    )]
    Json {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("DAG-CBOR decoding error")]
    #[diagnostic(
        code(skyglass_core::dagcbor_decoding_error),
        help("Failed to decode DAG-CBOR data for {data_type}: {details}")
    )]
    DagCbor { data_type: String, details: String },

    #[error("CAR error during {operation}")]
    #[diagnostic(
        code(skyglass_core::car_error),
        help("The binary frame is not a readable CAR v1 container")
    )]
    Car {
        operation: String,
        #[source]
        cause: iroh_car::Error,
    },
}

impl CoreError {
    /// Shorthand for a skipped record.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::RecordDecode {
            reason: reason.into(),
        }
    }

    pub fn transport(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
