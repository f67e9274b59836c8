use std::sync::Arc;

use anyhow::Context;
use prowler::config::AppConfig;
use prowler::credentials::{
    CommandFetcher, CredentialCache, CredentialFetcher, FileCredentialStore, UnavailableFetcher,
};
use prowler::notification::{BroadcastSink, NotificationSink, TelegramSink};
use prowler::scheduler::{SessionSupervisor, WorkerDeps};
use prowler::search::MtopSearchClient;
use prowler::utils::http_client::build_search_client;
use prowler::utils::shutdown::wait_for_shutdown_signal;
use prowler::{logging, panic_hook};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("Failed to initialize logging")?;
    panic_hook::install();
    if let Some(filter) = &config.log_filter
        && let Err(e) = logging_config.set_filter(filter)
    {
        warn!(error = %e, "Ignoring configured log filter");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "prowler starting");

    let shutdown_token = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown_token.child_token());

    // The durable store is the last line of defence; refuse to run without it.
    let store_path = config.store_path();
    let store = FileCredentialStore::open(&store_path)
        .await
        .with_context(|| format!("Credential store {} is not usable", store_path.display()))?;
    info!(path = %store_path.display(), "Credential store ready");

    let fetcher: Arc<dyn CredentialFetcher> = match &config.fetcher {
        Some(fetcher) => {
            info!(program = %fetcher.program.display(), "Using command credential fetcher");
            Arc::new(CommandFetcher::new(
                fetcher.program.clone(),
                fetcher.args.clone(),
            ))
        }
        None => {
            warn!("No credential fetcher configured; relying on static cookies and the store");
            Arc::new(UnavailableFetcher)
        }
    };

    let sink: Arc<dyn NotificationSink> = match &config.telegram {
        Some(telegram) => {
            let sink = TelegramSink::new(telegram.clone());
            if !sink.reinitialize().await {
                warn!("Telegram sink unavailable at startup; the health monitor will retry");
            }
            Arc::new(sink)
        }
        None => {
            info!("No Telegram configuration; notifications stay in-process");
            Arc::new(BroadcastSink::new())
        }
    };

    let cache = Arc::new(
        CredentialCache::new(
            config.cache_config(),
            config.validator(),
            fetcher,
            Arc::new(store),
        )
        .with_static_cookies(config.credentials.static_cookies.clone())
        .with_notifier(sink.clone()),
    );

    let client = build_search_client(
        config.search.proxy_url.as_deref(),
        config.request_timeout(),
        &config.search.user_agent,
    );
    let transport = Arc::new(MtopSearchClient::new(
        client,
        config.search.call.clone(),
        config.search.gateway_url.clone(),
    ));

    let deps = WorkerDeps {
        cache,
        transport,
        sink,
        call: Arc::new(config.search.call.clone()),
        token_cookie: config.credentials.token_cookie.clone(),
    };

    let supervisor = Arc::new(SessionSupervisor::new(
        deps,
        config.session.clone(),
        config.supervisor.clone(),
        shutdown_token.child_token(),
    ));
    supervisor.start_health_monitor();

    for initial in &config.sessions {
        let settings = initial.settings.clone().map(Arc::new);
        match supervisor.start(&initial.user_id, initial.queries.clone(), settings) {
            Ok(snapshot) => info!(user = %initial.user_id, queries = ?snapshot.queries, "Session started"),
            Err(e) => error!(user = %initial.user_id, error = %e, "Failed to start session"),
        }
    }
    info!(sessions = supervisor.active_users().len(), "prowler running");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Failed to listen for shutdown signals");
    }
    info!("Shutdown signal received");

    let report = supervisor.shutdown().await;
    shutdown_token.cancel();
    if !report.all_graceful() {
        warn!(
            forced = report.forced_terminations,
            "Some session workers had to be aborted"
        );
    }

    info!("prowler stopped");
    Ok(())
}
