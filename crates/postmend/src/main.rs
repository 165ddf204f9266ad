use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use postmend_core::audit::{AuditReport, audit_collections};
use postmend_core::config::{
    Collection, DEFAULT_COLLECTION, StoreBackend, ToolConfig, load_config,
};
use postmend_core::reconcile::{Outcome, ReconciliationReport};
use postmend_core::restore::{
    CollectionFailure, RestoreOptions, RestoreResult, restore_collections,
};
use postmend_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    resolve_paths,
};
use tracing_subscriber::EnvFilter;

const ALL_COLLECTIONS: &str = "all";

#[derive(Debug, Parser)]
#[command(
    name = "postmend",
    version,
    about = "Repair blog/news content stores from generated HTML pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Log per-record detail")]
    verbose: bool,
    #[arg(short, long, global = true, conflicts_with = "verbose", help = "Only log warnings")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .postmend/ with a default config")]
    Init(InitArgs),
    #[command(about = "Show resolved paths and layout warnings")]
    Status,
    #[command(about = "Backfill missing bodies from template pages")]
    Restore(RestoreArgs),
    #[command(about = "Report integrity problems without writing anything")]
    Audit(AuditArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    #[arg(short = 'c', long, value_name = "NAME", default_value = DEFAULT_COLLECTION, help = "Collection name or `all`")]
    collection: String,
    #[arg(long, help = "Show the diff that would be written and leave the store alone")]
    dry_run: bool,
    #[arg(long, help = "Skip the timestamped backup of JSON stores")]
    no_backup: bool,
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(short = 'c', long, value_name = "NAME", default_value = ALL_COLLECTIONS, help = "Collection name or `all`")]
    collection: String,
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Restore(args)) => run_restore(&runtime, args),
        Some(Commands::Audit(args)) => run_audit(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized postmend state");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("backups_dir: {}", normalize_path(&paths.backups_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    if report.wrote_config {
        println!("wrote_config: yes");
    } else {
        println!("wrote_config: no (exists; use --force to overwrite)");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let status = inspect_runtime(&paths);

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("templates_exists: {}", format_flag(status.templates_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    let backend = config.store_backend()?;
    println!("store.backend: {}", backend.as_str());
    if backend == StoreBackend::Sqlite {
        let db_path = config.db_path(&paths);
        println!(
            "store.db_path: {} ({})",
            normalize_path(&db_path),
            format_flag(db_path.exists())
        );
    }
    println!("store.backup: {}", format_flag(config.backup_enabled()));
    println!("extract.container_class: {}", config.container_class());
    for collection in config.collections(&paths)? {
        println!(
            "collection.{}: {} ({}) <- {}/{}",
            collection.name,
            normalize_path(&collection.data_file),
            format_flag(collection.data_file.exists()),
            normalize_path(&collection.templates_dir),
            collection.template_pattern
        );
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_restore(runtime: &RuntimeOptions, args: RestoreArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let collections = select_collections(&paths, &config, &args.collection)?;
    let options = RestoreOptions {
        dry_run: args.dry_run,
        no_backup: args.no_backup,
    };

    let outcome = restore_collections(&paths, &config, &collections, &options);
    match args.format {
        OutputFormat::Text => {
            for result in &outcome.completed {
                print_restore_result(result);
            }
            print_failures("restore", &outcome.failed);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }
    print_diagnostics(runtime, &paths);

    if !outcome.failed.is_empty() {
        bail!("restore failed for: {}", outcome.failed_names().join(", "));
    }
    Ok(())
}

fn run_audit(runtime: &RuntimeOptions, args: AuditArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let collections = select_collections(&paths, &config, &args.collection)?;
    let outcome = audit_collections(&paths, &config, &collections);

    match args.format {
        OutputFormat::Text => {
            for (name, report) in &outcome.completed {
                print_audit_report(name, report);
            }
            print_failures("audit", &outcome.failed);
        }
        OutputFormat::Json => {
            let reports: serde_json::Map<String, serde_json::Value> = outcome
                .completed
                .iter()
                .map(|(name, report)| -> Result<(String, serde_json::Value)> {
                    Ok((name.clone(), serde_json::to_value(report)?))
                })
                .collect::<Result<_>>()?;
            let rendered = serde_json::json!({
                "reports": reports,
                "failed": outcome.failed,
            });
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
    }
    print_diagnostics(runtime, &paths);

    let unclean: Vec<&str> = outcome
        .completed
        .iter()
        .filter(|(_, report)| !report.is_clean())
        .map(|(name, _)| name.as_str())
        .collect();
    if !outcome.failed.is_empty() {
        bail!("audit could not read: {}", outcome.failed_names().join(", "));
    }
    if !unclean.is_empty() {
        bail!(
            "audit found integrity problems in: {}\nRun: postmend restore --collection <name>",
            unclean.join(", ")
        );
    }
    Ok(())
}

fn select_collections(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    name: &str,
) -> Result<Vec<Collection>> {
    let name = name.trim();
    if name.is_empty() {
        bail!("--collection requires a non-empty name");
    }
    if name == ALL_COLLECTIONS {
        return config.collections(paths);
    }
    Ok(vec![config.collection(paths, name)?])
}

fn print_restore_result(result: &RestoreResult) {
    let prefix = format!("restore.{}", result.collection);
    println!("{prefix}.backend: {}", result.backend);
    println!("{prefix}.dry_run: {}", format_flag(result.dry_run));
    print_reconciliation_report(&prefix, &result.report);
    if let Some(diff) = &result.diff {
        if diff.is_empty() {
            println!("{prefix}.diff: <none>");
        } else {
            println!("{prefix}.diff:");
            print!("{diff}");
        }
    }
}

fn print_failures(command: &str, failures: &[CollectionFailure]) {
    for failure in failures {
        println!("{command}.{}.error: {}", failure.collection, failure.error);
    }
}

fn print_reconciliation_report(prefix: &str, report: &ReconciliationReport) {
    println!("{prefix}.store: {}", report.store);
    println!("{prefix}.total: {}", report.total);
    println!("{prefix}.skipped: {}", report.skipped);
    println!("{prefix}.restored: {}", report.restored);
    println!("{prefix}.missing_template: {}", report.missing_template);
    println!("{prefix}.no_body_found: {}", report.no_body_found);
    for outcome in [Outcome::Restored, Outcome::MissingTemplate, Outcome::NoBodyFound] {
        let ids = report.ids_with(outcome);
        if !ids.is_empty() {
            println!("{prefix}.{}.ids: {}", outcome.as_str(), join_ids(ids));
        }
    }
    for entry in &report.records {
        if let Some(detail) = &entry.detail {
            println!("{prefix}.detail.{}: {detail}", entry.id);
        }
    }
}

fn print_audit_report(name: &str, report: &AuditReport) {
    let prefix = format!("audit.{name}");
    println!("{prefix}.store: {}", report.store);
    println!("{prefix}.records_total: {}", report.records_total);
    println!("{prefix}.records_with_body: {}", report.records_with_body);
    println!(
        "{prefix}.records_missing_body: {}",
        report.records_missing_body()
    );
    let lists = [
        ("restorable", &report.restorable),
        ("missing_template", &report.missing_template),
        ("no_body_found", &report.no_body_found),
        ("orphan_templates", &report.orphan_templates),
    ];
    for (label, ids) in lists {
        if ids.is_empty() {
            println!("{prefix}.{label}: <none>");
        } else {
            println!("{prefix}.{label}: {}", join_ids(ids.iter()));
        }
    }
    for error in &report.template_errors {
        println!("{prefix}.template_error.{}: {}", error.id, error.error);
    }
    if let Some(error) = &report.template_listing_error {
        println!("{prefix}.template_listing_error: {error}");
    }
    println!("{prefix}.clean: {}", format_flag(report.is_clean()));
}

fn join_ids<'a, I, T>(ids: I) -> String
where
    I: IntoIterator<Item = &'a T>,
    T: std::fmt::Display + 'a,
{
    ids.into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
