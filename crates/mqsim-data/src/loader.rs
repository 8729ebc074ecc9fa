//! Format detection (RON/TOML/JSON), file discovery, parsing and validation
//! of simulation configuration.

use mqsim_core::config::{ConfigError, SimConfig};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base name of the configuration file looked up in a directory.
pub const CONFIG_BASE_NAME: &str = "mqsim";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed but holds values the simulation cannot run with.
    #[error("invalid configuration in {file}: {source}")]
    Invalid {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` and `.json` in `dir`.
///
/// Returns `Ok(None)` if none exists and `Err(ConflictingFormats)` if more
/// than one does.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for format in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{}", format.extension()));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

// ===========================================================================
// Parsing
// ===========================================================================

fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Parse and validate configuration text. `file` is only used in errors.
pub fn parse_config(content: &str, format: Format, file: &Path) -> Result<SimConfig, DataLoadError> {
    let config: SimConfig = deserialize_str(content, format, file)?;
    config.validate().map_err(|source| DataLoadError::Invalid {
        file: file.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<SimConfig, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content, format, path)?;
    debug!(file = %path.display(), ?format, "configuration loaded");
    Ok(config)
}

/// Load `mqsim.{ron,toml,json}` from `dir`, or the defaults if there is none.
pub fn load_config_from_dir(dir: &Path) -> Result<SimConfig, DataLoadError> {
    match find_data_file(dir, CONFIG_BASE_NAME)? {
        Some(path) => load_config(&path),
        None => {
            debug!(dir = %dir.display(), "no configuration file, using defaults");
            Ok(SimConfig::default())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
