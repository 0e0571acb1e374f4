//! Subcommand definitions and dispatch: the external CLI through which
//! an operator issues a command. Each subcommand resolves a
//! [`crate::context::HubContext`] handle, builds the relevant engine,
//! and runs exactly one operation.

use crate::context::HubContext;
use crate::plugins;
use clap::{Parser, Subcommand};
use hub_builder::{Builder, MapperRegistry};
use hub_diff::{CollectionRef, Differ, MapResolver, Mode as DiffMode, Scope, Step as DiffStep, SyncTarget, Syncer};
use hub_dumper::{Dumper, Step as DumpStep};
use hub_inspect::{Inspector, ReportMode};
use hub_models::diff::DiffVariant;
use hub_plugin::PluginConfig;
use hub_uploader::{Step as UploadStep, Uploader};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Operates a biomedical data-integration hub: dump, upload, build, diff, sync, inspect.")]
pub struct Cli {
    #[clap(flatten)]
    pub config: crate::config::ConfigArgs,

    /// Emit logs as JSON lines instead of human-readable text.
    #[clap(long, global = true)]
    pub json_logs: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plugin registry operations.
    Plugin {
        #[clap(subcommand)]
        action: PluginAction,
    },
    /// Runs a source's download steps.
    Dump {
        plugin_id: String,
        #[clap(long)]
        check_only: bool,
        #[clap(long)]
        force: bool,
    },
    /// Runs a source's parse-and-store steps.
    Upload {
        plugin_id: String,
        #[clap(long)]
        uploader: Option<String>,
        #[clap(long)]
        force: bool,
        #[clap(long, default_value = "1000")]
        batch_size: usize,
        #[clap(long, default_value = "10")]
        keep_archives: usize,
    },
    /// Registers (or updates) a build configuration.
    BuildCreate {
        name: String,
        #[clap(long = "source")]
        sources: Vec<String>,
        /// Root-set entries, optionally `!`-prefixed to negate.
        #[clap(long = "root")]
        root: Vec<String>,
        #[clap(long, default_value = "10")]
        keep_target_archives: usize,
    },
    /// Merges a build configuration's sources into a new target collection.
    Build {
        config_name: String,
        #[clap(long = "source")]
        sources: Vec<String>,
        #[clap(long)]
        target: Option<String>,
        #[clap(long)]
        force: bool,
    },
    /// Computes a JSON-patch diff between two collection states.
    Diff {
        old: String,
        new: String,
        /// Directory diff batch files are written under.
        #[clap(long, default_value = "diffs")]
        folder: std::path::PathBuf,
        #[clap(long, default_value = "1000")]
        batch_size: usize,
        #[clap(long, value_enum, default_value = "none")]
        mode: DiffModeArg,
        #[clap(long)]
        self_contained: bool,
    },
    /// Replays a previously computed diff against a document store.
    Sync {
        label: String,
        target_collection: String,
        old: String,
        new: String,
        #[clap(long, default_value = "diffs")]
        folder: std::path::PathBuf,
        #[clap(long, default_value = "1000")]
        batch_size: usize,
        #[clap(long)]
        force: bool,
    },
    /// Derives a type/stats/mapping report over a collection's documents.
    Inspect {
        collection: String,
        #[clap(long, value_enum, default_value = "type")]
        mode: InspectModeArg,
    },
    /// Runs the job dispatcher loop and polls pending builds until Ctrl-C.
    Serve {
        #[clap(long, default_value = "30")]
        poll_interval_secs: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum PluginAction {
    /// Registers every not-yet-known subdirectory of the plugin root.
    Discover,
    /// Lists registered plugins.
    List,
    /// Registers a single local plugin directory under `id`.
    Register { id: String, path: std::path::PathBuf },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
pub enum DiffModeArg {
    None,
    Purge,
}

impl From<DiffModeArg> for DiffMode {
    fn from(v: DiffModeArg) -> Self {
        match v {
            DiffModeArg::None => DiffMode::None,
            DiffModeArg::Purge => DiffMode::Purge,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
pub enum InspectModeArg {
    Type,
    Stats,
    Deepstats,
    Mapping,
}

impl From<InspectModeArg> for ReportMode {
    fn from(v: InspectModeArg) -> Self {
        match v {
            InspectModeArg::Type => ReportMode::Type,
            InspectModeArg::Stats => ReportMode::Stats,
            InspectModeArg::Deepstats => ReportMode::DeepStats,
            InspectModeArg::Mapping => ReportMode::Mapping,
        }
    }
}

/// Parses `old`/`new` endpoint strings: `source:<name>` / `target:<name>`
/// select the scoped form, anything else is a bare collection name.
fn parse_ref(s: &str) -> CollectionRef {
    if let Some(name) = s.strip_prefix("source:") {
        CollectionRef::Scoped { scope: Scope::Source, name: name.to_string() }
    } else if let Some(name) = s.strip_prefix("target:") {
        CollectionRef::Scoped { scope: Scope::Target, name: name.to_string() }
    } else {
        CollectionRef::Bare(s.to_string())
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.resolve()?;
    let ctx = HubContext::open(config)?;
    ctx.db.append_command("cli", serde_json::json!({"command": format!("{:?}", cli.command)})).await.ok();

    match cli.command {
        Command::Plugin { action } => run_plugin(&ctx, action).await,
        Command::Dump { plugin_id, check_only, force } => run_dump(&ctx, &plugin_id, check_only, force).await,
        Command::Upload { plugin_id, uploader, force, batch_size, keep_archives } => {
            run_upload(&ctx, &plugin_id, uploader.as_deref(), force, batch_size, keep_archives).await
        }
        Command::BuildCreate { name, sources, root, keep_target_archives } => {
            run_build_create(&ctx, &name, sources, root, keep_target_archives).await
        }
        Command::Build { config_name, sources, target, force } => {
            run_build(&ctx, &config_name, sources, target, force).await
        }
        Command::Diff { old, new, folder, batch_size, mode, self_contained } => {
            run_diff(&ctx, &old, &new, &folder, batch_size, mode.into(), self_contained).await
        }
        Command::Sync { label, target_collection, old, new, folder, batch_size, force } => {
            run_sync(&ctx, &label, &target_collection, &old, &new, &folder, batch_size, force).await
        }
        Command::Inspect { collection, mode } => run_inspect(&ctx, &collection, mode.into()).await,
        Command::Serve { poll_interval_secs } => run_serve(&ctx, poll_interval_secs).await,
    }
}

async fn run_plugin(ctx: &HubContext, action: PluginAction) -> anyhow::Result<()> {
    match action {
        PluginAction::Discover => {
            let registered = hub_plugin::discover_plugins(&ctx.db, &ctx.config.plugin_root).await?;
            for plugin in &registered {
                println!("registered {}", plugin.id);
            }
            println!("{} new plugin(s)", registered.len());
        }
        PluginAction::List => {
            for plugin in ctx.db.list_plugins().await? {
                println!("{}\t{:?}\t{}", plugin.id, plugin.plugin_type, plugin.url);
            }
        }
        PluginAction::Register { id, path } => {
            let loaded = hub_plugin::load_plugin_dir(&path, &id)?;
            ctx.db.register_plugin(&loaded.record).await?;
            if let PluginConfig::Manifest(manifest) = &loaded.config {
                if let Some(declared) = &manifest.display_name {
                    hub_plugin::canonicalize_name(&ctx.db, &id, declared).await?;
                }
            }
            println!("registered {id} from {}", path.display());
        }
    }
    Ok(())
}

async fn loaded_manifest(ctx: &HubContext, plugin_id: &str) -> anyhow::Result<(hub_plugin::Manifest, std::path::PathBuf)> {
    let record = ctx
        .db
        .get_plugin(plugin_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no such plugin {plugin_id:?}; run `hub plugin register` first"))?;
    let dir = record
        .data_folder
        .ok_or_else(|| anyhow::anyhow!("plugin {plugin_id:?} has no local data_folder"))?;
    let dir = std::path::PathBuf::from(dir);
    let loaded = hub_plugin::load_plugin_dir(&dir, plugin_id)?;
    match loaded.config {
        PluginConfig::Manifest(manifest) => Ok((manifest, dir)),
        PluginConfig::Advanced => anyhow::bail!("plugin {plugin_id:?} uses the advanced loader; no manifest to resolve a driver/uploader from"),
    }
}

async fn run_dump(ctx: &HubContext, plugin_id: &str, check_only: bool, force: bool) -> anyhow::Result<()> {
    let (manifest, _dir) = loaded_manifest(ctx, plugin_id).await?;
    let driver = plugins::driver_for(&manifest)?;
    let archive_root = ctx.config.archive_root.join(plugin_id);

    let dumper = Dumper::new(
        plugin_id,
        archive_root,
        true,
        true,
        driver,
        4,
        manifest.dumper.as_ref().is_some_and(|d| d.uncompress),
        ctx.db.clone(),
        ctx.jobs.clone(),
    );
    let steps = if check_only {
        vec![DumpStep::Check]
    } else {
        vec![DumpStep::Check, DumpStep::Download, DumpStep::Post]
    };
    match dumper.dump(&steps, force, check_only).await? {
        Some(result) => println!("new release available: {}", result.release),
        None => println!("dump complete for {plugin_id}"),
    }
    Ok(())
}

async fn run_upload(
    ctx: &HubContext,
    plugin_id: &str,
    uploader_name: Option<&str>,
    force: bool,
    batch_size: usize,
    keep_archives: usize,
) -> anyhow::Result<()> {
    let (manifest, _dir) = loaded_manifest(ctx, plugin_id).await?;
    let entry = plugins::uploader_entry(&manifest, uploader_name)?;
    let strategy = plugins::strategy_for(entry);

    let source = ctx
        .db
        .get_source(plugin_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no dump state recorded for {plugin_id:?}; run `hub dump` first"))?;
    let data_folder = source
        .download
        .data_folder
        .ok_or_else(|| anyhow::anyhow!("source {plugin_id:?} has no data_folder"))?;

    let sub_source = entry.name.clone().unwrap_or_else(|| plugin_id.to_string());
    let host = plugin_host_for(ctx, plugin_id).await?;

    let uploader = Uploader::new(
        plugin_id,
        sub_source,
        data_folder,
        entry.parser.clone(),
        entry.parser_kwargs.clone().unwrap_or(serde_json::Value::Null),
        batch_size,
        keep_archives,
        ctx.store.clone(),
        ctx.db.clone(),
        ctx.jobs.clone(),
        host,
        strategy,
    );

    let count = uploader
        .load(&[UploadStep::Data, UploadStep::Master, UploadStep::Post, UploadStep::Clean], force)
        .await?;
    println!("uploaded {count} document(s) for {plugin_id}");
    Ok(())
}

async fn plugin_host_for(ctx: &HubContext, plugin_id: &str) -> anyhow::Result<Arc<dyn hub_plugin::PluginHost>> {
    let record = ctx
        .db
        .get_plugin(plugin_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no such plugin {plugin_id:?}"))?;
    let dir = record
        .data_folder
        .ok_or_else(|| anyhow::anyhow!("plugin {plugin_id:?} has no local data_folder"))?;
    let loaded = hub_plugin::load_plugin_dir(std::path::Path::new(&dir), plugin_id)?;
    Ok(loaded.host)
}

async fn run_build_create(
    ctx: &HubContext,
    name: &str,
    sources: Vec<String>,
    root: Vec<String>,
    keep_target_archives: usize,
) -> anyhow::Result<()> {
    let mut config = hub_models::BuildConfig::new(name);
    config.sources = sources;
    config.root = root.iter().map(|s| s.parse().unwrap()).collect();
    config.keep_target_archives = keep_target_archives;
    config.validate_root()?;
    ctx.db.put_build_config(&config).await?;
    println!("build config {name} saved");
    Ok(())
}

async fn run_build(
    ctx: &HubContext,
    config_name: &str,
    sources: Vec<String>,
    target: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let builder = Builder::new(ctx.store.clone(), ctx.db.clone(), ctx.jobs.clone(), MapperRegistry::new(), None, 4);
    let sources = if sources.is_empty() { None } else { Some(sources) };
    let record = builder.merge(config_name, sources, target, force).await?;
    println!("build {} -> {:?} ({} docs total)", config_name, record.target_name, record.src_counts.values().sum::<u64>());
    Ok(())
}

async fn run_diff(
    ctx: &HubContext,
    old: &str,
    new: &str,
    folder: &std::path::Path,
    batch_size: usize,
    mode: DiffMode,
    self_contained: bool,
) -> anyhow::Result<()> {
    let resolver = Arc::new(MapResolver::new().with_source(ctx.store.clone()).with_target(ctx.store.clone()));
    let differ = Differ::new(resolver, folder);
    let variant = if self_contained { DiffVariant::SelfContained } else { DiffVariant::PatchOnly };
    let metadata = differ
        .diff(parse_ref(old), parse_ref(new), batch_size, &[DiffStep::Count, DiffStep::Content], mode, &[], variant)
        .await?;
    println!(
        "adds={} updates={} deletes={}",
        metadata.total_adds(),
        metadata.total_updates(),
        metadata.total_deletes()
    );
    Ok(())
}

async fn run_sync(
    ctx: &HubContext,
    label: &str,
    target_collection: &str,
    old: &str,
    new: &str,
    folder: &std::path::Path,
    batch_size: usize,
    force: bool,
) -> anyhow::Result<()> {
    let resolver = Arc::new(MapResolver::new().with_source(ctx.store.clone()).with_target(ctx.store.clone()));
    let syncer = Syncer::new(resolver, folder);
    let target = SyncTarget::Store { name: target_collection.to_string(), store: ctx.store.clone() };
    let stats = syncer
        .sync(label, &target, parse_ref(old), parse_ref(new), batch_size, None, force)
        .await?;
    println!("applied {} change(s)", stats.applied);
    Ok(())
}

async fn run_inspect(ctx: &HubContext, collection: &str, mode: ReportMode) -> anyhow::Result<()> {
    let docs = ctx.store.find(collection, &hub_models::Filter::all()).await?;
    let (report, errors) = Inspector::inspect(&docs, mode);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !errors.is_empty() {
        for err in &errors {
            eprintln!("warning: {err}");
        }
    }
    Ok(())
}

async fn run_serve(ctx: &HubContext, poll_interval_secs: u64) -> anyhow::Result<()> {
    let builder = Builder::new(ctx.store.clone(), ctx.db.clone(), ctx.jobs.clone(), MapperRegistry::new(), None, 4);

    let poller = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
        loop {
            interval.tick().await;
            match builder.poll_and_build().await {
                Ok(records) if !records.is_empty() => {
                    tracing::info!(count = records.len(), "poll triggered builds");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(?err, "poll_and_build failed"),
            }
        }
    });

    let shutdown = Box::pin(async {
        let _ = tokio::signal::ctrl_c().await;
    });
    ctx.jobs.run(shutdown).await;
    poller.abort();
    tracing::info!("shutting down");
    Ok(())
}
