mod lock;
mod output;

use anyhow::{Context, Result};
use cachesync_core::{
    CancelToken, DiskCache, IdSet, LocalBackend, MasterIndex, ObjectType, ReadThroughBackend,
    ReconcileConfig, Reconciler, default_cache_dir,
};
use clap::{Parser, Subcommand};
use lock::RepoLock;
use output::{ClearOutput, LsOutput, OutputWriter, StatOutput, UpdateOutput};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// cachesync - keep a local repository cache in line with the repository
#[derive(Parser)]
#[command(name = "cachesync")]
#[command(about = "Reconcile and prefetch the local cache of a backup repository", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository root directory
    #[arg(short, long, global = true, env = "CACHESYNC_REPO")]
    repo: Option<PathBuf>,

    /// Cache directory (defaults to $XDG_CACHE_HOME/cachesync)
    #[arg(long, global = true, env = "CACHESYNC_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evict stale entries and prefetch tree packs
    Update {
        /// Object types to reconcile (default: index, snapshot)
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<ObjectType>,

        /// Skip prefetching packs that hold tree blobs
        #[arg(long)]
        no_tree_packs: bool,

        /// Concurrent fetches per object type
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Show entry counts and sizes per object type
    Stat,

    /// List cached ids of one object type
    Ls {
        /// Object type to list
        #[arg(long = "type", value_name = "TYPE")]
        object_type: ObjectType,
    },

    /// Evict every cached entry of one object type
    Clear {
        /// Object type to clear
        #[arg(long = "type", value_name = "TYPE")]
        object_type: ObjectType,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);

    match run(cli, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn,cachesync=info,cachesync_core=info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, output: &OutputWriter) -> Result<()> {
    let cache_dir = cli
        .cache_dir
        .or_else(default_cache_dir)
        .context("No cache directory given and $HOME is not set")?;

    match cli.command {
        Commands::Update {
            types,
            no_tree_packs,
            workers,
        } => {
            let repo = cli
                .repo
                .context("No repository given (use --repo or CACHESYNC_REPO)")?;
            let mut config = ReconcileConfig {
                prefetch_tree_packs: !no_tree_packs,
                workers,
                ..ReconcileConfig::default()
            };
            if !types.is_empty() {
                config.object_types = types;
            }
            cmd_update(&repo, &cache_dir, config, output)
        }
        Commands::Stat => cmd_stat(&cache_dir, output),
        Commands::Ls { object_type } => cmd_ls(&cache_dir, object_type, output),
        Commands::Clear { object_type } => cmd_clear(&cache_dir, object_type, output),
    }
}

fn cmd_update(
    repo: &Path,
    cache_dir: &Path,
    config: ReconcileConfig,
    output: &OutputWriter,
) -> Result<()> {
    let backend = LocalBackend::open(repo)
        .with_context(|| format!("Failed to open repository at {}", repo.display()))?;
    let cache = DiskCache::open_or_create(cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let _lock = RepoLock::acquire(backend.root())?;
    let cancel = CancelToken::new();

    let index = MasterIndex::load(&backend, &cancel).context("Failed to load index")?;

    // Objects validated for a type are saved once that type has been committed.
    let cached_backend = ReadThroughBackend::new(&backend, &cache, config.object_types.clone());

    let report = Reconciler::new(&cached_backend, &cache, &cancel)
        .with_staging(&cached_backend)
        .with_config(config)
        .run(Some(&index))
        .context("Failed to update cache")?;

    let result = UpdateOutput {
        success: true,
        result_code: 0,
        cache_dir: cache_dir.display().to_string(),
        report,
    };
    output.write(&result, || result.text())
}

fn cmd_stat(cache_dir: &Path, output: &OutputWriter) -> Result<()> {
    let cache = DiskCache::open_or_create(cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let usage = cache.stats().context("Failed to read cache usage")?;

    let result = StatOutput {
        success: true,
        result_code: 0,
        cache_dir: cache_dir.display().to_string(),
        usage,
    };
    output.write(&result, || result.text())
}

fn cmd_ls(cache_dir: &Path, object_type: ObjectType, output: &OutputWriter) -> Result<()> {
    let cache = DiskCache::open_or_create(cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let ids = cache
        .list(object_type)
        .with_context(|| format!("Failed to list {} entries", object_type))?
        .to_sorted_vec();

    let result = LsOutput {
        success: true,
        result_code: 0,
        object_type,
        ids,
    };
    output.write(&result, || result.text())
}

fn cmd_clear(cache_dir: &Path, object_type: ObjectType, output: &OutputWriter) -> Result<()> {
    use cachesync_core::Cache;

    let cache = DiskCache::open_or_create(cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let stats = cache
        .retain(object_type, &IdSet::new())
        .with_context(|| format!("Failed to clear {} entries", object_type))?;

    let result = ClearOutput {
        success: true,
        result_code: 0,
        object_type,
        objects_deleted: stats.objects_deleted,
        bytes_freed: stats.bytes_freed,
    };
    output.write(&result, || result.text())
}
