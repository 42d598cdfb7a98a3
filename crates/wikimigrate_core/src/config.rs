use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::PandocOptions;
use crate::replay::OutputLayout;
use crate::revision::AuthorFallback;
use crate::source::FetchOptions;

pub const DEFAULT_MYSQL_BINARY: &str = "mysql";
pub const DEFAULT_OUTPUT_DIR: &str = "pages";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub convert: ConvertSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub authors: AuthorsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub mysql_binary: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub namespaces: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConvertSection {
    pub enabled: Option<bool>,
    pub pandoc: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub directory: Option<PathBuf>,
    pub extension: Option<String>,
    pub layout: Option<String>,
    pub user_folder: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AuthorsSection {
    pub fallback_user_id: Option<i64>,
    pub fallback_name: Option<String>,
    pub email_domain: Option<String>,
}

impl MigrateConfig {
    /// Database user: env WIKIMIGRATE_DB_USER > config.
    pub fn db_user(&self) -> Option<String> {
        env_override("WIKIMIGRATE_DB_USER").or_else(|| self.source.user.clone())
    }

    /// Database password: env WIKIMIGRATE_DB_PASSWORD > config.
    pub fn db_password(&self) -> Option<String> {
        env_override("WIKIMIGRATE_DB_PASSWORD").or_else(|| self.source.password.clone())
    }

    /// Database host: env WIKIMIGRATE_DB_HOST > config.
    pub fn db_host(&self) -> Option<String> {
        env_override("WIKIMIGRATE_DB_HOST").or_else(|| self.source.host.clone())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        let mut options = FetchOptions::default();
        if let Some(namespaces) = &self.source.namespaces
            && !namespaces.is_empty()
        {
            options.namespaces = namespaces.clone();
        }
        if let Some(user_id) = self.authors.fallback_user_id {
            options.fallback_user_id = user_id;
        }
        options
    }

    pub fn conversion_enabled(&self) -> bool {
        self.convert.enabled.unwrap_or(true)
    }

    /// Pandoc options: env WIKIMIGRATE_PANDOC overrides the binary.
    pub fn pandoc_options(&self) -> PandocOptions {
        let mut options = PandocOptions::default();
        if let Some(binary) = env_override("WIKIMIGRATE_PANDOC").or_else(|| self.convert.pandoc.clone())
        {
            options.binary = binary;
        }
        if let Some(from) = &self.convert.from {
            options.from = from.clone();
        }
        if let Some(to) = &self.convert.to {
            options.to = to.clone();
        }
        if let Some(extra_args) = &self.convert.extra_args {
            options.extra_args = extra_args.clone();
        }
        options
    }

    pub fn output_layout(&self) -> OutputLayout {
        let mut layout = OutputLayout::default();
        if let Some(extension) = &self.output.extension {
            layout.extension = extension.trim_start_matches('.').to_string();
        }
        if let Some(value) = &self.output.layout {
            layout.front_matter_layout = value.clone();
        }
        if let Some(folder) = &self.output.user_folder {
            layout.user_folder = folder.trim_matches('/').to_string();
        }
        layout
    }

    pub fn author_fallback(&self) -> AuthorFallback {
        let mut fallback = AuthorFallback::default();
        if let Some(name) = &self.authors.fallback_name {
            fallback.name = name.clone();
        }
        if let Some(domain) = &self.authors.email_domain {
            fallback.email_domain = domain.trim_start_matches('@').to_string();
        }
        fallback
    }
}

/// Load and parse a MigrateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
