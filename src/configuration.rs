use config::Config;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::*;

use crate::{
    control::ControlConfig, driver::hub_driver::HubConfig, lidar::LidarConfig,
    navigation::NavigationConfig,
};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub lidar: LidarConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub control: ControlConfig,
    /// JSON waypoint list loaded at startup
    #[serde(default)]
    pub mission: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .add_source(config::Environment::with_prefix("APP").separator("__"))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .add_source(config::Environment::with_prefix("APP").separator("__"))
                .build()?
        };

        Ok(settings.try_deserialize()?)
    }
}
