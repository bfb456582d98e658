//! Configuration loading helper functions
//!
//! Layers, lowest priority first: the type's `Default`, an optional YAML or
//! TOML file, then environment variables carrying the given prefix.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Build the layered figment for `T`
pub fn figment_for<T>(path: Option<&Path>, env_prefix: &str) -> Result<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        figment = match extension {
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "toml" => figment.merge(Toml::file(path)),
            _ => {
                return Err(Error::Config(format!(
                    "unsupported config file format: {}",
                    path.display()
                )))
            },
        };
        info!("Config file: {}", path.display());
    }

    debug!("Config env prefix: {}", env_prefix);
    Ok(figment.merge(Env::prefixed(env_prefix)))
}

/// Load `T` from defaults, an optional file and prefixed environment variables
///
/// ```ignore
/// let config: TcpMasterConfig = common::config_loader::load_config(Some(path), "MBPROBE_")?;
/// ```
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(path, env_prefix)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}
