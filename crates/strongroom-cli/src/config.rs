//! Configuration loading
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file,
//! `STRONGROOM__*` environment variables (nested keys joined with `__`, e.g.
//! `STRONGROOM__KDF__LOG_N`), then explicit command line overrides.

use crate::error::CliError;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use strongroom_crypto::SecurityConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STRONGROOM";

/// Separator between the prefix and nested keys
pub const ENV_SEPARATOR: &str = "__";

/// Values given explicitly on the command line
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub key_store_dir: Option<PathBuf>,
    pub pgp_root: Option<PathBuf>,
    pub key_size: Option<usize>,
}

impl Overrides {
    fn apply(&self, mut config: SecurityConfig) -> SecurityConfig {
        if let Some(dir) = &self.key_store_dir {
            config = config.with_key_store_dir(dir.clone());
        }
        if let Some(dir) = &self.pgp_root {
            config = config.with_pgp_root(dir.clone());
        }
        if let Some(key_size) = self.key_size {
            config = config.with_key_size(key_size);
        }
        config
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

/// Load and validate the security configuration from every source
pub fn load_config(file: Option<&Path>, overrides: &Overrides) -> Result<SecurityConfig, CliError> {
    load_config_with(file, environment(), overrides)
}

pub(crate) fn load_config_with(
    file: Option<&Path>,
    env: Environment,
    overrides: &Overrides,
) -> Result<SecurityConfig, CliError> {
    let mut builder = Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config: SecurityConfig = builder.add_source(env).build()?.try_deserialize()?;
    let config = overrides.apply(config);
    config.validate()?;

    tracing::debug!(
        key_store = %config.key_store_dir.display(),
        pgp_root = %config.pgp_root.display(),
        key_size = config.key_size,
        "Loaded configuration"
    );
    Ok(config)
}
