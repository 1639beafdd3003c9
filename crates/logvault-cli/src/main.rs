//! Logvault CLI - lock coordinator and repository administration

use clap::{Parser, Subcommand};
use logvault_core::config::Config;
use logvault_core::domain::locking::{LockClient, LockManager, LockServer};
use chrono::{DateTime, Utc};
use logvault_core::domain::project::{
    CounterSet, FileNode, ProjectInfo, ProjectManager, ReadFilter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "logvault")]
#[command(author, version, about = "Shared log bundle repository", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Act as its own lock coordinator instead of connecting to one
    #[arg(long, global = true)]
    standalone: bool,

    /// User owning the `private` domain (defaults to $USER)
    #[arg(long, global = true)]
    user: Option<String>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lock coordinator until interrupted
    Coordinator,
    /// Manage domains
    Domain {
        #[command(subcommand)]
        action: DomainAction,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage bundles
    Bundle {
        #[command(subcommand)]
        action: BundleAction,
    },
    /// Manage stats datasets
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DomainAction {
    /// Create a domain directory
    Create { domain: String },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Create {
        domain: String,
        project: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List projects of a domain
    List { domain: String },
    /// Show a project's index
    Show { domain: String, project: String },
    /// Open or close a project
    Status {
        domain: String,
        project: String,
        /// open or close
        status: String,
    },
    /// Change a project's description
    Describe {
        domain: String,
        project: String,
        description: String,
    },
    /// Delete a project and everything in it
    Delete { domain: String, project: String },
    /// List files in the project directory that the index does not know about
    Orphans { domain: String, project: String },
}

#[derive(Subcommand)]
enum BundleAction {
    /// Register an archive (a path, or a file already in the project directory)
    Register {
        domain: String,
        project: String,
        file: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Keep the original archive next to the extracted bundle
        #[arg(long)]
        preserve: bool,
    },
    /// Delete a bundle
    Delete {
        domain: String,
        project: String,
        id: u64,
    },
    /// Change a bundle's description
    Describe {
        domain: String,
        project: String,
        id: u64,
        description: String,
    },
    /// List the files of an available bundle
    Files {
        domain: String,
        project: String,
        id: u64,
        /// Only list files containing this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Show metadata of a file or directory inside a bundle
    Stat {
        domain: String,
        project: String,
        id: u64,
        file: String,
    },
    /// Print a file inside a bundle
    Read {
        domain: String,
        project: String,
        id: u64,
        file: String,
        /// Only print lines containing this text
        #[arg(long)]
        grep: Option<String>,
        /// Drop lines stamped before this RFC 3339 time
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Drop lines stamped after this RFC 3339 time
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum StatsAction {
    /// Convert and register a CSV (a path, or a file already in the project directory)
    Register {
        domain: String,
        project: String,
        file: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Delete a stats dataset
    Delete {
        domain: String,
        project: String,
        id: u64,
    },
    /// List the counters of a stats dataset
    Counters {
        domain: String,
        project: String,
        id: u64,
        /// Which counters: all, nonzero or vitality
        #[arg(long, default_value = "all", value_parser = parse_counter_set)]
        set: CounterSet,
    },
    /// Print the series of selected counters as JSON
    Data {
        domain: String,
        project: String,
        id: u64,
        /// Counter names
        #[arg(required = true)]
        counters: Vec<String>,
    },
}

fn parse_counter_set(s: &str) -> Result<CounterSet, String> {
    CounterSet::parse(s).ok_or_else(|| format!("{} is not one of all, nonzero, vitality", s))
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<logvault_core::Error>() {
            Some(core) => eprintln!("Error [{}]: {}", core.code(), core.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("logvault=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context {
        format: cli.format,
        quiet: cli.quiet,
        standalone: cli.standalone,
        user: cli.user.unwrap_or_else(default_user),
    };

    match cli.command {
        Commands::Coordinator => cmd_coordinator(&ctx).await,
        Commands::Domain { action } => cmd_domain(&ctx, action).await,
        Commands::Project { action } => cmd_project(&ctx, action).await,
        Commands::Bundle { action } => cmd_bundle(&ctx, action).await,
        Commands::Stats { action } => cmd_stats(&ctx, action).await,
        Commands::Config { action } => cmd_config(&ctx, action),
    }
}

struct Context {
    format: OutputFormat,
    quiet: bool,
    standalone: bool,
    user: String,
}

impl Context {
    fn manager(&self) -> anyhow::Result<ProjectManager> {
        let config = Config::load()?;
        let lock = if self.standalone {
            LockClient::coordinator(LockManager::new(config.lock_config()))
        } else {
            LockClient::worker(config.lock_config())
        };

        Ok(ProjectManager::new(config.resource_tree(), lock)
            .with_stats_converter(Arc::new(config.stats_converter())))
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Print a text line unless quiet or in JSON mode
    fn say(&self, line: impl AsRef<str>) {
        if !self.quiet && !self.json() {
            println!("{}", line.as_ref());
        }
    }

    fn emit_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".to_string())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_coordinator(ctx: &Context) -> anyhow::Result<()> {
    let config = Config::load()?;
    let lock_config = config.lock_config();
    let socket = lock_config.socket_path.clone();

    let manager = LockManager::new(lock_config);
    let server = LockServer::bind(manager.clone(), &socket)?;

    ctx.say(format!("Lock coordinator listening on {}", socket.display()));

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let remaining = manager.list_active_locks().await;
    if !remaining.is_empty() {
        warn!(count = remaining.len(), "Coordinator stopped with locks still held");
    }
    info!("Lock coordinator stopped");
    Ok(())
}

async fn cmd_domain(ctx: &Context, action: DomainAction) -> anyhow::Result<()> {
    match action {
        DomainAction::Create { domain } => {
            ctx.manager()?.create_domain(&ctx.user, &domain).await?;
            ctx.say(format!("Domain '{}' is ready.", domain));
        }
    }
    Ok(())
}

fn print_tree(node: &FileNode, depth: usize) {
    let suffix = if node.file { "" } else { "/" };
    println!("{}{}{}", "  ".repeat(depth), node.name, suffix);
    for child in node.children.iter().flatten() {
        print_tree(child, depth + 1);
    }
}

fn print_project(info: &ProjectInfo) {
    println!("{} [{}]", info.name, info.status);
    if !info.description.is_empty() {
        println!("  Description: {}", info.description);
    }
    println!("  Opened: {}", info.opened.to_rfc3339());
    if let Some(closed) = info.closed {
        println!("  Closed: {}", closed.to_rfc3339());
    }
    for bundle in &info.bundles {
        let state = if bundle.available { "available" } else { "archived" };
        let preserved = if bundle.preserved { ", preserved" } else { "" };
        println!(
            "  bundle {:>3}  {}{} ({}{})",
            bundle.id, bundle.name, bundle.kind, state, preserved
        );
    }
    for stats in &info.stats {
        println!("  stats  {:>3}  {}{}", stats.id, stats.name, stats.kind);
    }
}

async fn cmd_project(ctx: &Context, action: ProjectAction) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let user = ctx.user.as_str();

    match action {
        ProjectAction::Create {
            domain,
            project,
            description,
        } => {
            manager
                .create_project(user, &domain, &project, &description)
                .await?;
            ctx.say(format!("Project '{}' created in '{}'.", project, domain));
        }
        ProjectAction::List { domain } => {
            let projects = manager.list_projects(user, &domain).await?;
            if ctx.json() {
                ctx.emit_json(&projects)?;
            } else if projects.is_empty() {
                ctx.say("No projects found.");
            } else {
                for p in projects {
                    println!(
                        "{:<24} {:<6} bundles={} stats={}",
                        p.name,
                        p.status,
                        p.bundles.len(),
                        p.stats.len()
                    );
                }
            }
        }
        ProjectAction::Show { domain, project } => {
            let info = manager.project_info(user, &domain, &project).await?;
            if ctx.json() {
                ctx.emit_json(&info)?;
            } else {
                print_project(&info);
            }
        }
        ProjectAction::Status {
            domain,
            project,
            status,
        } => {
            let transition = manager
                .update_project_status(user, &domain, &project, &status)
                .await?;
            ctx.say(format!("Project '{}' is now {}.", project, transition.status()));

            let report = transition.wait().await?;
            if ctx.json() {
                ctx.emit_json(&serde_json::json!({
                    "status": report.status,
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                    "applied": report.applied,
                }))?;
            } else {
                ctx.say(format!(
                    "{} bundle(s) processed, {} failed.",
                    report.succeeded.len(),
                    report.failed.len()
                ));
            }
        }
        ProjectAction::Describe {
            domain,
            project,
            description,
        } => {
            manager
                .update_project_description(user, &domain, &project, &description)
                .await?;
            ctx.say("Description updated.");
        }
        ProjectAction::Delete { domain, project } => {
            manager.delete_project(user, &domain, &project).await?;
            ctx.say(format!("Project '{}' deleted.", project));
        }
        ProjectAction::Orphans { domain, project } => {
            let orphans = manager.find_orphans(user, &domain, &project).await?;
            if ctx.json() {
                ctx.emit_json(&orphans)?;
            } else if orphans.is_empty() {
                ctx.say("No orphaned entries.");
            } else {
                for name in orphans {
                    println!("{}", name);
                }
            }
        }
    }
    Ok(())
}

/// Copy `file` into the project directory when it names a file elsewhere.
///
/// Returns the name the file has inside the project directory.
async fn stage_upload(
    manager: &ProjectManager,
    user: &str,
    domain: &str,
    project: &str,
    file: &str,
) -> anyhow::Result<String> {
    let source = PathBuf::from(file);
    let Some(name) = source.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        anyhow::bail!("Not a file name: {}", file);
    };

    let target = manager.tree().project_file(user, domain, project, &name);
    if source.is_file() && !same_file(&source, &target) {
        tokio::fs::copy(&source, &target).await.map_err(|e| {
            anyhow::anyhow!("Failed to copy {} into the project: {}", source.display(), e)
        })?;
    }
    Ok(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn cmd_bundle(ctx: &Context, action: BundleAction) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let user = ctx.user.as_str();

    match action {
        BundleAction::Register {
            domain,
            project,
            file,
            description,
            preserve,
        } => {
            manager.project_info(user, &domain, &project).await?;
            let name = stage_upload(&manager, user, &domain, &project, &file).await?;
            let bundle = manager
                .register_bundle(user, &domain, &project, &name, &description, preserve)
                .await?;
            if ctx.json() {
                ctx.emit_json(&bundle)?;
            } else {
                ctx.say(format!("Bundle '{}' registered with ID {}.", bundle.name, bundle.id));
            }
        }
        BundleAction::Delete {
            domain,
            project,
            id,
        } => {
            manager.delete_bundle(user, &domain, &project, id).await?;
            ctx.say(format!("Bundle {} deleted.", id));
        }
        BundleAction::Describe {
            domain,
            project,
            id,
            description,
        } => {
            manager
                .update_bundle_description(user, &domain, &project, id, &description)
                .await?;
            ctx.say("Description updated.");
        }
        BundleAction::Files {
            domain,
            project,
            id,
            search,
        } => {
            let tree = manager
                .list_bundle_files(user, &domain, &project, id, search.as_deref())
                .await?;
            if ctx.json() {
                ctx.emit_json(&tree)?;
            } else {
                print_tree(&tree, 0);
            }
        }
        BundleAction::Stat {
            domain,
            project,
            id,
            file,
        } => {
            let info = manager
                .bundle_file_info(user, &domain, &project, id, &file)
                .await?;
            if ctx.json() {
                ctx.emit_json(&info)?;
            } else {
                let kind = if info.is_directory { "directory" } else { "file" };
                println!("{} ({})", info.path, kind);
                println!("  Size: {}", info.size);
                println!("  Modified: {}", info.modified_at.to_rfc3339());
                for child in info.children.iter().flatten() {
                    println!("  {}", child);
                }
            }
        }
        BundleAction::Read {
            domain,
            project,
            id,
            file,
            grep,
            from,
            to,
        } => {
            let filter = ReadFilter {
                text: grep,
                from,
                to,
            };
            let content = manager
                .read_bundle_file(user, &domain, &project, id, &file, &filter)
                .await?;
            if ctx.json() {
                ctx.emit_json(&content)?;
            } else {
                println!("{}", content.trim_end_matches('\n'));
            }
        }
    }
    Ok(())
}

async fn cmd_stats(ctx: &Context, action: StatsAction) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let user = ctx.user.as_str();

    match action {
        StatsAction::Register {
            domain,
            project,
            file,
            description,
        } => {
            manager.project_info(user, &domain, &project).await?;
            let name = stage_upload(&manager, user, &domain, &project, &file).await?;
            let stats = manager
                .register_stats(user, &domain, &project, &name, &description)
                .await?;
            if ctx.json() {
                ctx.emit_json(&stats)?;
            } else {
                ctx.say(format!("Stats '{}' registered with ID {}.", stats.name, stats.id));
            }
        }
        StatsAction::Delete {
            domain,
            project,
            id,
        } => {
            manager.delete_stats(user, &domain, &project, id).await?;
            ctx.say(format!("Stats {} deleted.", id));
        }
        StatsAction::Counters {
            domain,
            project,
            id,
            set,
        } => {
            let counters = manager
                .stats_counters(user, &domain, &project, id, set)
                .await?;
            if ctx.json() {
                ctx.emit_json(&counters)?;
            } else {
                for counter in counters {
                    println!("{}", counter);
                }
            }
        }
        StatsAction::Data {
            domain,
            project,
            id,
            counters,
        } => {
            let data = manager
                .stats_data(user, &domain, &project, id, &counters)
                .await?;
            ctx.emit_json(&data)?;
        }
    }
    Ok(())
}

fn cmd_config(ctx: &Context, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            ctx.say(format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if ctx.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                ctx.emit_json(&map)?;
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            ctx.say("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}
