use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::DEFAULT_OUTPUT_DIR;
use crate::error::MigrateError;

pub const CONFIG_FILENAME: &str = "wikimigrate.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub config_path: PathBuf,
    pub config_source: ValueSource,
    pub output_dir: PathBuf,
    pub output_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({}) exists={}\noutput_dir={} ({}) exists={}",
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.config_path.exists(),
            normalize_for_display(&self.output_dir),
            self.output_source.as_str(),
            self.output_dir.exists(),
        )
    }
}

/// Config file: flag > WIKIMIGRATE_CONFIG > `wikimigrate.toml` in the working directory.
pub fn resolve_config_path(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> (PathBuf, ValueSource) {
    resolve_config_path_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_config_path_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.config.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = lookup_env("WIKIMIGRATE_CONFIG").filter(|value| !value.trim().is_empty())
    {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }
    (context.cwd.join(CONFIG_FILENAME), ValueSource::Default)
}

/// Output directory: flag > `[output] directory` > `pages`.
pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    configured_output: Option<&Path>,
) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, configured_output, |key| {
        env::var(key).ok()
    })
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    configured_output: Option<&Path>,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) =
        resolve_config_path_with_lookup(context, overrides, lookup_env);
    let (output_dir, output_source) = if let Some(path) = overrides.output.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(path) = configured_output {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (context.cwd.join(DEFAULT_OUTPUT_DIR), ValueSource::Default)
    };

    ResolvedPaths {
        config_path,
        config_source,
        output_dir,
        output_source,
    }
}

/// The migration never writes into an existing directory.
pub fn ensure_output_absent(path: &Path) -> Result<(), MigrateError> {
    if path.exists() {
        return Err(MigrateError::OutputPathExists(path.to_path_buf()));
    }
    Ok(())
}

pub fn render_default_config() -> String {
    format!(
        "# wikimigrate configuration (written by `wikimigrate init-config`)\n\
# Environment overrides: WIKIMIGRATE_DB_USER, WIKIMIGRATE_DB_PASSWORD,\n\
# WIKIMIGRATE_DB_HOST, WIKIMIGRATE_PANDOC. Command-line flags override both.\n\
\n\
[source]\n\
# database = \"wikidb\"\n\
# user = \"wikiuser\"\n\
# host = \"localhost\"\n\
# mysql_binary = \"mysql\"\n\
# sqlite_path = \"wiki.sqlite\"\n\
namespaces = [0, 2]\n\
\n\
[convert]\n\
enabled = true\n\
pandoc = \"pandoc\"\n\
from = \"mediawiki\"\n\
to = \"gfm\"\n\
extra_args = [\"--shift-heading-level-by=1\"]\n\
\n\
[output]\n\
directory = \"{DEFAULT_OUTPUT_DIR}\"\n\
extension = \"md\"\n\
layout = \"default\"\n\
user_folder = \"User\"\n\
\n\
[authors]\n\
# Account credited with anonymous edits.\n\
fallback_user_id = 1\n\
fallback_name = \"MediaWiki default\"\n\
email_domain = \"localhost\"\n"
    )
}

/// Write the default config to `path`. Returns `false` when the file exists and `force` is off.
pub fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    }
    fs::write(path, render_default_config())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
