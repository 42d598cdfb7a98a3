use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wikimigrate_core::config::{DEFAULT_MYSQL_BINARY, MigrateConfig, load_config};
use wikimigrate_core::convert::{ContentConverter, PandocConverter, PassthroughConverter};
use wikimigrate_core::migrate::{MigrationOptions, MigrationReport, migrate_into_git};
use wikimigrate_core::revision::unescape_field;
use wikimigrate_core::runtime::{
    CONFIG_FILENAME, PathOverrides, ResolutionContext, ResolvedPaths, resolve_config_path,
    resolve_paths, write_default_config,
};
use wikimigrate_core::source::{
    DataSource, MysqlCliSource, MysqlConnection, SqliteSource, list_pages,
};

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Replay MediaWiki revision history as git commits"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Replay every revision into a new git repository")]
    Migrate(MigrateArgs),
    #[command(about = "List current page titles per namespace")]
    Pages(PagesArgs),
    #[command(name = "init-config", about = "Write a commented default config file")]
    InitConfig(InitConfigArgs),
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(long, value_name = "NAME", help = "MySQL database name")]
    database: Option<String>,
    #[arg(long, value_name = "USER")]
    user: Option<String>,
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read from a SQLite copy of the wiki database")]
    sqlite: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_name = "DIR", help = "Repository to create [default: pages]")]
    output: Option<PathBuf>,
    #[arg(long, help = "Commit wiki markup without converting it")]
    no_convert: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct PagesArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long = "namespace", value_name = "ID", help = "Namespace to list (repeatable)")]
    namespaces: Vec<i32>,
}

#[derive(Debug, Args)]
struct InitConfigArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Pages(args)) => run_pages(&runtime, args),
        Some(Commands::InitConfig(args)) => run_init_config(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime, args.output.clone())?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }

    let mut source = build_source(&args.source, &config)?;
    let converter = build_converter(args.no_convert, &config);
    let options = MigrationOptions {
        fetch: config.fetch_options(),
        layout: config.output_layout(),
        authors: config.author_fallback(),
    };
    debug!(?options, "migration options");

    let report = migrate_into_git(
        &paths.output_dir,
        source.as_mut(),
        converter.as_ref(),
        &options,
    )?;
    info!(commits = report.replay.commits, "migration complete");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&paths.output_dir, &report);
    }
    Ok(())
}

fn run_pages(runtime: &RuntimeOptions, args: PagesArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime, None)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }

    let namespaces = if args.namespaces.is_empty() {
        config.fetch_options().namespaces
    } else {
        args.namespaces
    };
    let mut source = build_source(&args.source, &config)?;
    for namespace in namespaces {
        let titles = list_pages(source.as_mut(), namespace)?;
        println!("namespace {namespace}: {} pages", titles.len());
        for title in titles {
            println!("  {}", unescape_field(&title));
        }
    }
    Ok(())
}

fn run_init_config(runtime: &RuntimeOptions, args: InitConfigArgs) -> Result<()> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        config: runtime.config.clone(),
        ..PathOverrides::default()
    };
    let (config_path, config_source) = resolve_config_path(&context, &overrides);
    let wrote = write_default_config(&config_path, args.force)?;

    println!("config_path: {}", normalize_path(&config_path));
    println!("config_source: {}", config_source.as_str());
    println!("wrote_config: {}", format_flag(wrote));
    if !wrote {
        println!("hint: pass --force to overwrite the existing {CONFIG_FILENAME}");
    }
    Ok(())
}

fn resolve_runtime(
    runtime: &RuntimeOptions,
    output: Option<PathBuf>,
) -> Result<(ResolvedPaths, MigrateConfig)> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        config: runtime.config.clone(),
        output,
    };
    let (config_path, _) = resolve_config_path(&context, &overrides);
    let config = load_config(&config_path)?;
    let paths = resolve_paths(&context, &overrides, config.output.directory.as_deref());
    Ok((paths, config))
}

/// Flags win over the config file; `--sqlite` wins over any MySQL setting.
fn build_source(args: &SourceArgs, config: &MigrateConfig) -> Result<Box<dyn DataSource>> {
    if let Some(path) = args.sqlite.as_ref().or(config.source.sqlite_path.as_ref()) {
        if !path.exists() {
            bail!("sqlite database not found: {}", normalize_path(path));
        }
        debug!(path = %path.display(), "reading from sqlite");
        return Ok(Box::new(SqliteSource::new(path.clone())));
    }

    let connection = mysql_connection(args, config)?;
    debug!(?connection, "reading from mysql");
    Ok(Box::new(MysqlCliSource::new(connection)))
}

/// Each field: flag > env (user, password, host) > config.
fn mysql_connection(args: &SourceArgs, config: &MigrateConfig) -> Result<MysqlConnection> {
    let database = args
        .database
        .clone()
        .or_else(|| config.source.database.clone())
        .context("no data source configured: pass --database or --sqlite, or set [source] database")?;
    let user = args
        .user
        .clone()
        .or_else(|| config.db_user())
        .context("no database user: pass --user or set WIKIMIGRATE_DB_USER")?;

    Ok(MysqlConnection {
        binary: config
            .source
            .mysql_binary
            .clone()
            .unwrap_or_else(|| DEFAULT_MYSQL_BINARY.to_string()),
        database,
        user,
        password: args.password.clone().or_else(|| config.db_password()),
        host: args.host.clone().or_else(|| config.db_host()),
    })
}

fn build_converter(no_convert: bool, config: &MigrateConfig) -> Box<dyn ContentConverter> {
    if no_convert || !config.conversion_enabled() {
        return Box::new(PassthroughConverter);
    }
    Box::new(PandocConverter::new(config.pandoc_options()))
}

fn print_report(output: &Path, report: &MigrationReport) {
    let replay = &report.replay;
    println!("migration complete");
    println!("output: {}", normalize_path(output));
    println!("fetched_rows: {}", report.fetched_rows);
    println!("commits: {}", replay.commits);
    println!("created: {}", replay.created);
    println!("updated: {}", replay.updated);
    println!("deleted: {}", replay.deleted);
    println!("noop_removals: {}", replay.noop_removals);
    println!(
        "last_commit: {}",
        replay.last_commit.as_deref().unwrap_or("<none>")
    );
    println!("conversion_failures: {}", replay.conversion_failures.len());
    for page in &replay.conversion_failures {
        println!("  - {page}");
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
