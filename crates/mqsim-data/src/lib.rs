//! Configuration files for mqsim sessions.
//!
//! A directory may hold one `mqsim.ron`, `mqsim.toml` or `mqsim.json`. The
//! file is parsed into a [`SimConfig`](mqsim_core::config::SimConfig) and
//! validated before use. Sections and fields that are left out keep their
//! defaults.

pub mod loader;

pub use loader::{
    CONFIG_BASE_NAME, DataLoadError, Format, load_config, load_config_from_dir, parse_config,
};
