use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use deposit_escrow::application::Dependencies;
use deposit_escrow::application::orders::OrderService;
use deposit_escrow::application::scheduler::CaptureScheduler;
use deposit_escrow::application::settlement::SettlementEngine;
use deposit_escrow::config::{SchedulerConfig, ServerConfig, parse_seconds};
use deposit_escrow::domain::caller::{Caller, Role};
use deposit_escrow::error::PaymentError;
use deposit_escrow::domain::ports::{ClockRef, LedgerStoreRef, OrderStoreRef};
use deposit_escrow::infrastructure::clock::{FixedClock, SystemClock};
use deposit_escrow::infrastructure::gateway::SandboxGateway;
use deposit_escrow::infrastructure::in_memory::{
    InMemoryLedgerStore, InMemoryLock, InMemoryOrderStore, InMemoryPolicyStore,
    InMemoryProviderDirectory,
};
use deposit_escrow::infrastructure::notifier::TracingNotifier;
use deposit_escrow::interfaces::csv::seed_reader::SeedReader;
use deposit_escrow::interfaces::http::{AppState, create_router};
use deposit_escrow::jobs::start_capture_job;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the order payment API and run the periodic capture job
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Shared secret expected in `x-cron-key` or `x-api-key`
        #[arg(long, env = "CRON_SECRET")]
        cron_secret: Option<String>,

        /// Seconds between in-process capture runs
        #[arg(long, env = "CAPTURE_INTERVAL_SECS", default_value = "300", value_parser = parse_seconds)]
        capture_interval: Duration,

        /// Rely on the cron endpoint only
        #[arg(long)]
        no_capture_job: bool,

        #[command(flatten)]
        scheduler: SchedulerArgs,

        #[command(flatten)]
        seed: SeedArgs,
    },
    /// Run one deposit capture batch and print its report as JSON
    Capture {
        /// Pin the clock to this instant (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        #[command(flatten)]
        scheduler: SchedulerArgs,

        #[command(flatten)]
        seed: SeedArgs,
    },
}

#[derive(Args)]
struct SchedulerArgs {
    #[arg(long, env = "CAPTURE_LOCK_TTL_SECS", default_value = "60", value_parser = parse_seconds)]
    lock_ttl: Duration,

    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value = "20", value_parser = parse_seconds)]
    gateway_timeout: Duration,

    #[arg(long, env = "CAPTURE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,
}

impl TryFrom<&SchedulerArgs> for SchedulerConfig {
    type Error = PaymentError;

    fn try_from(args: &SchedulerArgs) -> std::result::Result<Self, Self::Error> {
        let config = Self {
            lock_ttl: args.lock_ttl,
            gateway_timeout: args.gateway_timeout,
            concurrency: args.concurrency,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct SeedArgs {
    /// Payment policies CSV. Without it only the `default` policy exists.
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Provider payout destinations CSV
    #[arg(long)]
    providers: Option<PathBuf>,

    /// Orders CSV, created (and authorized when a payment reference is given) at startup
    #[arg(long)]
    orders: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "DB_PATH")]
    db_path: Option<PathBuf>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,deposit_escrow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn in_memory_stores() -> (OrderStoreRef, LedgerStoreRef) {
    (
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryLedgerStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<(OrderStoreRef, LedgerStoreRef)> {
    use deposit_escrow::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            tracing::info!(path = %path.display(), "using RocksDB storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<(OrderStoreRef, LedgerStoreRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

async fn build(
    seed: &SeedArgs,
    clock: ClockRef,
    gateway: Arc<SandboxGateway>,
) -> Result<Dependencies> {
    let (orders, ledger) = open_stores(seed.db_path.as_deref())?;

    let policies = match &seed.policies {
        Some(path) => {
            let store = InMemoryPolicyStore::new();
            for policy in SeedReader::new(File::open(path).into_diagnostic()?).policies() {
                store.publish(policy.into_diagnostic()?).await.into_diagnostic()?;
            }
            store
        }
        None => InMemoryPolicyStore::with_default_policy(),
    };

    let providers = InMemoryProviderDirectory::new();
    if let Some(path) = &seed.providers {
        for destination in SeedReader::new(File::open(path).into_diagnostic()?).providers() {
            providers.register(destination.into_diagnostic()?).await;
        }
    }

    Ok(Dependencies {
        orders,
        ledger,
        policies: Arc::new(policies),
        providers: Arc::new(providers),
        gateway,
        lock: Arc::new(InMemoryLock::new(clock.clone())),
        clock,
        notifier: Arc::new(TracingNotifier),
    })
}

/// Creates the seeded orders. Rows carrying a payment reference get a
/// matching sandbox authorization and are authorized by their customer.
async fn seed_orders(path: &Path, service: &OrderService, gateway: &SandboxGateway) -> Result<()> {
    for record in SeedReader::new(File::open(path).into_diagnostic()?).orders() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Error reading order: {}", e);
                continue;
            }
        };
        let order = match service.create_order(record.new_order()).await {
            Ok(order) => order,
            Err(e) => {
                eprintln!("Error creating order: {}", e);
                continue;
            }
        };
        if let Some(reference) = &record.payment_reference {
            gateway.register_authorization(reference, order.deposit_amount);
            let customer = Caller::new(order.customer_id.clone(), Role::Customer);
            if let Err(e) = service.authorize(&customer, order.id, reference).await {
                eprintln!("Error authorizing order {}: {}", order.id, e);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Serve {
            bind,
            cron_secret,
            capture_interval,
            no_capture_job,
            scheduler,
            seed,
        } => {
            let server = ServerConfig {
                bind,
                cron_secret,
                capture_interval: (!no_capture_job).then_some(capture_interval),
            };
            let scheduler = SchedulerConfig::try_from(&scheduler).into_diagnostic()?;
            let gateway = Arc::new(SandboxGateway::new());
            let deps = build(&seed, Arc::new(SystemClock), gateway.clone()).await?;

            let orders = Arc::new(OrderService::new(deps.clone()));
            if let Some(path) = &seed.orders {
                seed_orders(path, &orders, &gateway).await?;
            }
            let capture = Arc::new(CaptureScheduler::new(deps.clone(), scheduler));
            if let Some(period) = server.capture_interval {
                start_capture_job(capture.clone(), period);
            }
            if server.cron_secret.is_none() {
                tracing::warn!("CRON_SECRET is not set; /cron/capture-deposits will reject every call");
            }

            let app = create_router(AppState {
                orders,
                scheduler: capture,
                settlement: Arc::new(SettlementEngine::new(deps)),
                cron_secret: server.cron_secret,
            });
            let listener = tokio::net::TcpListener::bind(server.bind)
                .await
                .into_diagnostic()?;
            tracing::info!("Server listening on {}", listener.local_addr().into_diagnostic()?);
            axum::serve(listener, app).await.into_diagnostic()?;
        }
        Command::Capture {
            now,
            scheduler,
            seed,
        } => {
            let scheduler = SchedulerConfig::try_from(&scheduler).into_diagnostic()?;
            let clock: ClockRef = match now {
                Some(now) => Arc::new(FixedClock::new(now)),
                None => Arc::new(SystemClock),
            };
            let gateway = Arc::new(SandboxGateway::new());
            let deps = build(&seed, clock, gateway.clone()).await?;

            if let Some(path) = &seed.orders {
                let orders = OrderService::new(deps.clone());
                seed_orders(path, &orders, &gateway).await?;
            }
            let report = CaptureScheduler::new(deps, scheduler)
                .run()
                .await
                .into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
    }

    Ok(())
}
