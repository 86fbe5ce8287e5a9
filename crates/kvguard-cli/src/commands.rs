//! Command handlers

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kvguard_filter::{FilterConfig, MembershipFilter};
use kvguard_lock::{ContextId, LockManager};
use kvguard_store::{KeyValueStore, MemoryStore};
use tracing::info;

use crate::cli::{Command, FilterArgs, FilterCommand, LockCommand};
use crate::config::Configuration;

/// Exit code when a lock is held by another owner
const EXIT_CONTENDED: u8 = 2;

const MEMORY_EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(command: Command, configuration: &Configuration) -> anyhow::Result<ExitCode> {
    let store = open_store(configuration).await?;
    let result = match command {
        Command::Lock(lock) => run_lock(lock, store.clone(), configuration).await,
        Command::Filter(filter) => run_filter(filter, store.clone(), configuration).await,
    };
    store.close();
    result
}

async fn open_store(configuration: &Configuration) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    if configuration.use_memory_store() {
        info!("Using in-process memory store");
        let store = MemoryStore::standalone();
        store.spawn_expiry_task(MEMORY_EXPIRY_INTERVAL);
        return Ok(Arc::new(store));
    }

    let config = configuration.store_config();
    kvguard_store::open_store(&config)
        .await
        .with_context(|| format!("failed to connect to store at {}", config.url()))
}

async fn run_lock(
    command: LockCommand,
    store: Arc<dyn KeyValueStore>,
    configuration: &Configuration,
) -> anyhow::Result<ExitCode> {
    let locks = LockManager::with_settings(store, configuration.lock_settings());
    let settings = locks.settings().clone();
    let ctx = ContextId::generate();

    match command {
        LockCommand::Acquire {
            name,
            ttl_ms,
            wait_ms,
            retry_ms,
            hold_ms,
        } => {
            let ttl_ms = ttl_ms.unwrap_or(settings.ttl_ms);
            let wait_ms = wait_ms.unwrap_or(settings.replication_wait_ms);
            let acquired = match retry_ms {
                Some(retry_ms) => {
                    locks
                        .acquire_with_retry(&ctx, &name, ttl_ms, wait_ms, retry_ms)
                        .await?
                }
                None => locks.acquire(&ctx, &name, ttl_ms, wait_ms).await?,
            };
            if !acquired {
                println!("{}: not acquired", name);
                return Ok(ExitCode::from(EXIT_CONTENDED));
            }

            println!("{}: acquired", name);
            if hold_ms > 0 {
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;
            }
            if locks.release(&ctx, &name).await? {
                println!("{}: released", name);
            } else {
                println!("{}: lost to another owner before release", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        LockCommand::Run {
            name,
            ttl_ms,
            throw,
            command,
        } => {
            let Some((program, args)) = command.split_first() else {
                anyhow::bail!("no command given");
            };
            let ttl_ms = ttl_ms.unwrap_or(settings.ttl_ms);

            let status = locks
                .run_guarded(&ctx, &name, ttl_ms, throw, || async {
                    tokio::process::Command::new(program)
                        .args(args)
                        .status()
                        .await
                        .with_context(|| format!("failed to run {}", program))
                })
                .await?;

            match status {
                Some(status) => Ok(status
                    .code()
                    .map_or(ExitCode::FAILURE, |code| ExitCode::from(code as u8))),
                None => {
                    eprintln!("{}: held by another owner, command skipped", name);
                    Ok(ExitCode::from(EXIT_CONTENDED))
                }
            }
        }
    }
}

async fn run_filter(
    command: FilterCommand,
    store: Arc<dyn KeyValueStore>,
    configuration: &Configuration,
) -> anyhow::Result<ExitCode> {
    let (args, elements) = match command {
        FilterCommand::Add { filter, elements } => (filter, Some((true, elements))),
        FilterCommand::Test { filter, elements } => (filter, Some((false, elements))),
        FilterCommand::Info { filter } => (filter, None),
    };
    let filter = MembershipFilter::create(store, filter_config(args, configuration)).await?;

    match elements {
        Some((true, elements)) => {
            for element in &elements {
                filter.add(element).await?;
            }
            println!("{}: added {} element(s)", filter.name(), elements.len());
        }
        Some((false, elements)) => {
            for element in &elements {
                println!("{}\t{}", element, filter.test(element).await?);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(filter.state())?),
    }
    Ok(ExitCode::SUCCESS)
}

fn filter_config(args: FilterArgs, configuration: &Configuration) -> FilterConfig {
    FilterConfig {
        name: args.name,
        expected_insertions: args.expected,
        error_rate: args
            .error_rate
            .unwrap_or_else(|| configuration.filter_error_rate()),
        expiration_ms: args.expire_ms,
    }
}
