//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `SURVEY_STATS_*` environment variables.

use std::path::Path;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::source::TrackValues;

pub const ENV_PREFIX: &str = "SURVEY_STATS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSizes {
    pub responses: u64,
    pub distributions: u64,
    pub text_answers: u64,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            responses: 20,
            distributions: 10,
            text_answers: 50,
        }
    }
}

impl From<&PageSizes> for TrackValues {
    fn from(sizes: &PageSizes) -> Self {
        TrackValues {
            responses: sizes.responses,
            distributions: sizes.distributions,
            text_answers: sizes.text_answers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub include_test_data: bool,
    pub page_sizes: PageSizes,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            include_test_data: false,
            page_sizes: PageSizes::default(),
        }
    }
}

impl AppConfig {
    /// `database_url` from config, falling back to `DATABASE_URL`.
    pub fn database_url(&self) -> anyhow::Result<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
            .context("database_url (or DATABASE_URL) must point at a Postgres instance")
    }
}

pub fn figment(config_file: Option<&Path>) -> Figment {
    let figment = Figment::from(Serialized::defaults(AppConfig::default()));
    let figment = match config_file {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment,
    };
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(config_file: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(config_file = ?config_file, "loading configuration");
    let context = match config_file {
        Some(path) => format!(
            "failed to parse configuration from '{}' and {ENV_PREFIX}* environment variables",
            path.display()
        ),
        None => format!("failed to parse configuration from {ENV_PREFIX}* environment variables"),
    };
    figment(config_file).extract().context(context)
}
