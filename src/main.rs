use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use sstcloud_alice_gateway::config::Config;
use sstcloud_alice_gateway::db::PgStorage;
use sstcloud_alice_gateway::env_file;
use sstcloud_alice_gateway::notifier::AliceNotifier;
use sstcloud_alice_gateway::provider::sst::SstProviderFactory;
use sstcloud_alice_gateway::services::checker::CheckerService;
use sstcloud_alice_gateway::services::gateway::DeviceGateway;
use sstcloud_alice_gateway::services::worker::WorkerHandle;

const DONE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wait for `signal` or for the checker to finish on its own.
///
/// `Ok(None)` means the signal fired; `Ok(Some(_))` carries the checker's
/// result when it exited first.
async fn wait_for_stop(
    signal: impl Future<Output = std::io::Result<()>>,
    done: &Receiver<Result<(), String>>,
) -> Result<Option<Result<(), String>>, String> {
    tokio::pin!(signal);
    loop {
        tokio::select! {
            received = &mut signal => {
                return received.map(|_| None).map_err(|e| format!("failed to listen for Ctrl-C: {}", e));
            }
            _ = tokio::time::sleep(DONE_POLL_INTERVAL) => {
                if let Ok(result) = done.try_recv() {
                    return Ok(Some(result));
                }
            }
        }
    }
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (request_period={}s, provider_cache={}s, sst_url={}, log_only_errors={})",
        cfg.request_period.as_secs(),
        cfg.provider_cache_ttl.as_secs(),
        cfg.sst.url,
        cfg.log_only_errors
    );

    // 2) Connect DB and apply pending migrations
    let storage = Arc::new(PgStorage::connect(&cfg.database_url, cfg.log_only_errors).map_err(|e| e.to_string())?);
    storage.apply_migrations().map_err(|e| e.to_string())?;

    // 3) Wire the pollers and the device gateway
    let notifier = Arc::new(AliceNotifier::new(&cfg.alice));
    let factory = Arc::new(SstProviderFactory::new(cfg.sst.clone()));
    let checker = Arc::new(CheckerService::new(
        cfg.request_period,
        storage.clone(),
        factory.clone(),
        notifier,
    ));
    let gateway = DeviceGateway::caching(
        storage.clone(),
        storage,
        factory,
        cfg.provider_cache_ttl,
        checker.clone(),
    );
    info!("Device gateway ready (provider cache {}s)", cfg.provider_cache_ttl.as_secs());

    // 4) Run until Ctrl-C
    let (done_tx, done_rx) = std::sync::mpsc::channel::<Result<(), String>>();
    let runner = checker.clone();
    let handle = WorkerHandle::spawn("checker".into(), move |stop| {
        let result = runner.run(stop).map_err(|e| e.to_string());
        // receiver is gone once shutdown has begun
        let _ = done_tx.send(result);
    })
    .map_err(|e| format!("failed to start checker: {}", e))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build signal runtime: {}", e))?;
    let early_exit = runtime.block_on(wait_for_stop(tokio::signal::ctrl_c(), &done_rx));

    let outcome = match early_exit {
        Ok(Some(result)) => {
            handle.join();
            result
        }
        Ok(None) => {
            info!("Shutting down, marking devices offline");
            handle.join();
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            handle.join();
            Err(e)
        }
    };
    // gateway lives until the checker is joined
    drop(gateway);
    outcome
}

fn main() {
    let loaded_env = match env_file::load_from_args(std::env::args_os().skip(1)) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "sstcloud-alice-gateway {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
