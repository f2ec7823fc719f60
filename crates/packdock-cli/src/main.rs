//! packdock daemon and admin CLI.
//!
//! The composition root: wires the SQLite repositories, the local blob
//! store, the in-memory KV store behind the lock manager, the upstream
//! clients, and one worker loop per task family.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use packdock_core::config::SyncConfig;
use packdock_core::kv::MemoryKvStore;
use packdock_core::lock::LockManager;
use packdock_core::ports::{
    BinaryRepository, DistStore, PackageManager, ProxyCacheRepository, TaskRepository,
    VersionFileRepository,
};
use packdock_core::task::{SyncPackageData, Task, TaskType};
use packdock_db::{
    FsDistStore, SqliteBinaryRepository, SqlitePackageRepository, SqliteProxyCacheRepository,
    SqliteTaskRepository, SqliteVersionFileRepository, setup,
};
use packdock_sources::{HttpBackend, RegistryClient, ReqwestBackend, SourceRegistry};
use packdock_sync::{
    BinarySyncer, FileSyncService, HookTrigger, PackageSyncer, ProxyCacheService, TaskExecutor,
    TaskService, WorkerLoop, WorkerOptions,
};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Parser)]
#[command(name = "packdock", version, about = "Private package registry sync daemon")]
struct Cli {
    /// SQLite database URL
    #[arg(long, env = "PACKDOCK_DATABASE_URL", default_value = "sqlite://packdock.db")]
    database_url: String,

    /// Blob store root directory
    #[arg(long, env = "PACKDOCK_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// JSON config file (SyncConfig shape); defaults apply when omitted
    #[arg(long, env = "PACKDOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker loops and the daily proxy-cache sweep
    Serve,
    /// Enqueue a package sync task
    Sync {
        /// Package fullname, e.g. `lodash` or `@scope/name`
        fullname: String,
        /// Note recorded in the task log
        #[arg(long)]
        tips: Option<String>,
    },
    /// Create the database schema and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    let pool = setup::connect(&cli.database_url)
        .await
        .with_context(|| format!("cannot open database {}", cli.database_url))?;
    setup::migrate(&pool).await.context("schema migration failed")?;

    match cli.command {
        Command::Migrate => {
            info!("schema is up to date at {}", cli.database_url);
            Ok(())
        }
        Command::Sync { fullname, tips } => {
            let app = App::build(pool, &cli.data_dir, config)?;
            let data = SyncPackageData {
                tips,
                specific_versions: None,
            };
            let task = app
                .task_service
                .create_task(Task::new(
                    TaskType::SyncPackage,
                    fullname,
                    serde_json::to_value(data)?,
                ))
                .await?;
            info!(
                "sync task enqueued, taskId: {}, targetName: {}",
                task.task_id, task.target_name
            );
            Ok(())
        }
        Command::Serve => {
            let app = App::build(pool, &cli.data_dir, config)?;
            app.serve().await
        }
    }
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SyncConfig> {
    match path {
        None => Ok(SyncConfig::default()),
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("cannot parse config file {}", path.display()))
        }
    }
}

/// Everything the daemon runs on, wired once at startup.
struct App {
    config: Arc<SyncConfig>,
    task_service: Arc<TaskService>,
    package_syncer: Arc<PackageSyncer>,
    binary_syncer: Arc<BinarySyncer>,
    hook_trigger: Arc<HookTrigger>,
    proxy_cache: Arc<ProxyCacheService>,
}

impl App {
    fn build(
        pool: packdock_db::SqlitePool,
        data_dir: &std::path::Path,
        config: Arc<SyncConfig>,
    ) -> anyhow::Result<Self> {
        let dist: Arc<dyn DistStore> = Arc::new(FsDistStore::new(data_dir));
        let lock = Arc::new(LockManager::new(Arc::new(MemoryKvStore::new())));
        let backend: Arc<dyn HttpBackend> =
            Arc::new(ReqwestBackend::new().context("cannot build HTTP client")?);

        let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let task_service = Arc::new(TaskService::new(
            task_repo,
            Arc::clone(&dist),
            Arc::clone(&config),
        ));

        let registry = Arc::new(
            RegistryClient::new(Arc::clone(&backend), &config.source_registry)
                .context("invalid source registry url")?,
        );
        let sources = Arc::new(
            SourceRegistry::from_config(Arc::clone(&backend), &config.binary_sources)
                .context("cannot resolve binary sources")?,
        );

        let packages: Arc<dyn PackageManager> = Arc::new(SqlitePackageRepository::new(
            pool.clone(),
            Arc::clone(&dist),
        ));
        let version_files: Arc<dyn VersionFileRepository> =
            Arc::new(SqliteVersionFileRepository::new(pool.clone()));
        let binaries: Arc<dyn BinaryRepository> =
            Arc::new(SqliteBinaryRepository::new(pool.clone()));
        let proxy_repo: Arc<dyn ProxyCacheRepository> =
            Arc::new(SqliteProxyCacheRepository::new(pool));

        let file_sync = Arc::new(FileSyncService::new(
            version_files,
            Arc::clone(&dist),
            Arc::clone(&lock),
        ));
        let package_syncer = Arc::new(PackageSyncer::new(
            Arc::clone(&registry),
            Arc::clone(&backend),
            packages,
            Arc::clone(&lock),
            Arc::clone(&task_service),
            file_sync,
            Arc::clone(&config),
        ));
        let binary_syncer = Arc::new(BinarySyncer::new(
            sources,
            binaries,
            Arc::clone(&dist),
            Arc::clone(&backend),
            lock,
            Arc::clone(&task_service),
            Arc::clone(&config),
        ));
        let hook_trigger = Arc::new(HookTrigger::new(backend, Arc::clone(&task_service)));
        let proxy_cache = Arc::new(ProxyCacheService::new(
            registry,
            proxy_repo,
            dist,
            Arc::clone(&task_service),
        ));

        Ok(Self {
            config,
            task_service,
            package_syncer,
            binary_syncer,
            hook_trigger,
            proxy_cache,
        })
    }

    fn spawn_worker(
        &self,
        name: &'static str,
        task_type: TaskType,
        executor: Arc<dyn TaskExecutor>,
        shutdown: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let worker = Arc::new(WorkerLoop::new(
            WorkerOptions {
                name,
                enabled: self.config.family_enabled(task_type),
                ceiling: self.config.worker_ceiling(task_type),
                tick_interval: TICK_INTERVAL,
            },
            executor,
            Arc::clone(&self.task_service),
        ));
        worker.spawn(shutdown.clone())
    }

    async fn serve(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let mut handles = vec![
            self.spawn_worker(
                "SyncPackageWorker",
                TaskType::SyncPackage,
                Arc::clone(&self.package_syncer) as Arc<dyn TaskExecutor>,
                &shutdown,
            ),
            self.spawn_worker(
                "SyncBinaryWorker",
                TaskType::SyncBinary,
                Arc::clone(&self.binary_syncer) as Arc<dyn TaskExecutor>,
                &shutdown,
            ),
            self.spawn_worker(
                "TriggerHookWorker",
                TaskType::TriggerHook,
                Arc::clone(&self.hook_trigger) as Arc<dyn TaskExecutor>,
                &shutdown,
            ),
            self.spawn_worker(
                "UpdateProxyCacheWorker",
                TaskType::UpdateProxyCache,
                Arc::clone(&self.proxy_cache) as Arc<dyn TaskExecutor>,
                &shutdown,
            ),
        ];
        handles.push(self.spawn_proxy_sweep(&shutdown));
        info!("packdock daemon is up, mode: {:?}", self.config.sync_mode);

        tokio::signal::ctrl_c()
            .await
            .context("cannot listen for shutdown signal")?;
        info!("shutting down");
        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// The daily sweep that enqueues proxy-cache refresh tasks.
    fn spawn_proxy_sweep(&self, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let proxy = Arc::clone(&self.proxy_cache);
        let enabled = self.config.family_enabled(TaskType::UpdateProxyCache);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if !enabled {
                return;
            }
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match proxy.enqueue_refresh_tasks().await {
                            Ok(created) => {
                                info!("[UpdateProxyCacheWorker:sweep] enqueued {created} refresh tasks");
                            }
                            Err(err) => {
                                error!("[UpdateProxyCacheWorker:sweep:error] {err}");
                            }
                        }
                    }
                }
            }
        })
    }
}
