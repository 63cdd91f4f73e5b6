//! Hrc - HTTP response cache with tag based invalidation

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, IndexBackend, LogFormat, LoggingConfig, StorageBackend};
use hrc_core::{CallbackRegistry, Hrc, ReadOutcome, RequestContext, SaveOutcome};
use hrc_db::Database;
use hrc_index::{BucketIndex, MemoryIndex, TagIndex};
use hrc_storage::{CacheStore, LocalStore, MemoryStore};

/// Hrc - HTTP response cache with tag based invalidation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", env = "HRC_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configured rules
    Check,
    /// Show which rule a request matches and the key it produces
    Match {
        #[command(flatten)]
        request: RequestArgs,
        /// Logical name the key is derived for
        #[arg(long, default_value = "page")]
        name: String,
    },
    /// Read cached content for a request
    Read {
        name: String,
        #[command(flatten)]
        request: RequestArgs,
        /// Use this rule instead of matching
        #[arg(long)]
        rule: Option<String>,
    },
    /// Save content for a request
    Save {
        name: String,
        #[command(flatten)]
        request: RequestArgs,
        /// File holding the content, stdin when omitted
        #[arg(long)]
        file: Option<String>,
        /// Use this rule instead of matching
        #[arg(long)]
        rule: Option<String>,
        /// Extra tag for this entry, may be repeated
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Purge a single cache key
    PurgeKey { key: String },
    /// Purge every entry carrying all of the given tags
    PurgeTags {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// List live keys carrying all of the given tags
    Keys { tags: Vec<String> },
    /// Remove expired rows from the database backends
    Prune,
}

/// A synthetic request
#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// Request path, optionally with a query string
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Header as `Name: value`, may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Cookie as `name=value`, may be repeated
    #[arg(long = "cookie")]
    cookies: Vec<String>,
}

impl RequestArgs {
    fn to_context(&self) -> Result<RequestContext> {
        let mut ctx = RequestContext::new(self.method.as_str(), &self.url);
        for header in &self.headers {
            let Some((name, value)) = header.split_once(':') else {
                bail!("Invalid header {:?}, expected `Name: value`", header);
            };
            ctx = ctx.with_header(name, value.trim());
        }
        for cookie in &self.cookies {
            let Some((name, value)) = cookie.split_once('=') else {
                bail!("Invalid cookie {:?}, expected `name=value`", cookie);
            };
            ctx = ctx.with_cookie(name.trim(), value);
        }
        Ok(ctx)
    }
}

/// Backends selected by configuration
struct Backends {
    store: Arc<dyn CacheStore>,
    index: Arc<dyn TagIndex>,
    db: Option<Database>,
}

async fn open_backends(config: &Config) -> Result<Backends> {
    let db = if config.uses_database() {
        if let Some(parent) = Path::new(&config.database.path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_url = format!("sqlite:{}", config.database.path);
        Some(
            Database::new(&db_url)
                .await
                .with_context(|| format!("Failed to open database {}", config.database.path))?,
        )
    } else {
        None
    };

    let store: Arc<dyn CacheStore> = match (config.storage.backend, &db) {
        (StorageBackend::Memory, _) => Arc::new(MemoryStore::new()),
        (StorageBackend::Local, _) => Arc::new(LocalStore::new(&config.storage.local.path).await?),
        (StorageBackend::Sqlite, Some(db)) => Arc::new(db.clone()),
        (StorageBackend::Sqlite, None) => bail!("sqlite storage requires a database"),
    };

    let index: Arc<dyn TagIndex> = match (config.index.backend, &db) {
        (IndexBackend::Memory, _) => Arc::new(MemoryIndex::new()),
        (IndexBackend::Filesystem, _) => {
            Arc::new(BucketIndex::new(&config.index.filesystem.path).await?)
        }
        (IndexBackend::Sqlite, Some(db)) => Arc::new(db.clone()),
        (IndexBackend::Sqlite, None) => bail!("sqlite index requires a database"),
    };

    info!(
        "Using {:?} storage and {:?} index",
        config.storage.backend, config.index.backend
    );

    Ok(Backends { store, index, db })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging);

    info!("Starting Hrc v{}", env!("CARGO_PKG_VERSION"));

    let callbacks = CallbackRegistry::new();
    let rules = config
        .rules
        .build(&callbacks)
        .context("Invalid cache rules")?;

    if let Command::Check = args.command {
        println!("{} rules OK", rules.len());
        for rule in &rules {
            println!("  {} ttl={}s tags={:?}", rule.name(), rule.ttl(), rule.tags());
        }
        return Ok(());
    }

    let backends = open_backends(&config).await?;
    let mut hrc = Hrc::new(rules, backends.store.clone(), backends.index.clone());
    hrc.set_control_key(config.cache.control_key.clone());
    hrc.set_purge_flag(config.cache.purge_flag);

    match args.command {
        Command::Check => {}
        Command::Match { request, name } => {
            let ctx = request.to_context()?;
            match hrc.matched_rule(&ctx, None) {
                Some(matched) => {
                    println!("rule:     {}", matched.rule.name());
                    println!("fragment: {}", matched.fragment.material());
                    println!(
                        "key:      {}",
                        hrc_core::key::derive_joint_key(&name, &matched.fragment_hash())
                    );
                }
                None => println!("no rule matched"),
            }
        }
        Command::Read {
            name,
            request,
            rule,
        } => {
            let ctx = request.to_context()?;
            let traced = hrc.read(&ctx, &name, rule.as_deref()).await;
            if hrc.can_debug(&ctx) {
                eprintln!("{}", serde_json::to_string_pretty(&traced.log)?);
            }
            match traced.value {
                ReadOutcome::Hit(cached) => {
                    info!("HIT, {}s remaining", cached.remaining_ttl());
                    use std::io::Write;
                    std::io::stdout().write_all(&cached.content)?;
                }
                ReadOutcome::Miss => println!("MISS"),
                ReadOutcome::Purged => println!("PURGED"),
            }
        }
        Command::Save {
            name,
            request,
            file,
            rule,
            tags,
        } => {
            let ctx = request.to_context()?;
            let content = match file {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path))?,
                None => {
                    use tokio::io::AsyncReadExt;
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };

            let traced = hrc
                .save(&ctx, &name, Bytes::from(content), rule.as_deref(), &tags)
                .await?;
            if hrc.can_debug(&ctx) {
                eprintln!("{}", serde_json::to_string_pretty(&traced.log)?);
            }
            match traced.value {
                SaveOutcome::Saved(key) => println!("{}", key),
                SaveOutcome::Skipped => println!("SKIPPED"),
                SaveOutcome::Cancelled => println!("CANCELLED"),
            }
        }
        Command::PurgeKey { key } => {
            let found = hrc.purge_by_cache_key(&key).await?;
            println!("{}", if found { "purged" } else { "not found" });
        }
        Command::PurgeTags { tags } => {
            let purged = hrc.purge_by_tags(&tags).await?;
            println!("purged {} entries", purged);
        }
        Command::Keys { tags } => {
            for key in backends.index.select_by_tags(&tags).await? {
                println!("{}", key);
            }
        }
        Command::Prune => match &backends.db {
            Some(db) => {
                let stats = db.prune_expired().await?;
                let remaining = db.get_cache_entry_count().await?;
                println!(
                    "pruned {} cache entries and {} index entries, {} cache entries remain",
                    stats.cache_entries, stats.index_entries, remaining
                );
            }
            None => println!("no database backend configured"),
        },
    }

    Ok(())
}

/// Initialize logging. Logs go to stderr so command output stays clean.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}
