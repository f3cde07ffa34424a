use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use relay_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use relay_core::{
    batch::{BatchRegistry, RelayService},
    cleanup::{sweep_startup, StatusLedger},
    config::Config,
    messaging::port::MessagingPort,
    ports::{RelaySink, SourceReader},
    progress::{ProgressHub, ProgressMonitor},
    session::SessionBroker,
    store::FileStore,
    transfer::TransferEngine,
};
use relay_gateway::GatewayReader;

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub relay: Arc<RelayService>,
    pub store: Arc<FileStore>,
    pub messenger: Arc<dyn MessagingPort>,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "relay bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(
        download_dir = %cfg.download_dir.display(),
        daily_quota = cfg.daily_quota,
        "configuration loaded"
    );

    // Status traffic is edit-heavy; throttle it. Uploads go straight to the raw adapter.
    let telegram = Arc::new(TelegramMessenger::new(bot.clone()));
    let raw_messenger: Arc<dyn MessagingPort> = telegram.clone();
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let sink: Arc<dyn RelaySink> = telegram;

    let ledger = Arc::new(StatusLedger::open(&cfg.status_ledger_file)?);
    match sweep_startup(&cfg.download_dir, &ledger, messenger.clone()).await {
        Ok(report) => tracing::info!(
            files = report.files_removed,
            statuses = report.statuses_removed,
            "startup sweep done"
        ),
        Err(e) => tracing::warn!(error = %e, "startup sweep failed"),
    }

    let store = Arc::new(FileStore::open(&cfg.store_file, cfg.daily_quota)?);
    let reader: Arc<dyn SourceReader> = Arc::new(GatewayReader::new(
        cfg.gateway_url.clone(),
        cfg.gateway_api_key.clone(),
    )?);

    let monitor = Arc::new(ProgressMonitor::new(
        Arc::new(ProgressHub::new()),
        cfg.relay.progress_sample,
    ));
    let engine = TransferEngine::new(
        messenger.clone(),
        sink,
        store.clone(),
        monitor,
        ledger,
        cfg.relay.clone(),
    );
    let relay = Arc::new(RelayService::new(
        Arc::new(BatchRegistry::new()),
        store.clone(),
        SessionBroker::new(store.clone(), reader),
        engine,
        messenger.clone(),
        cfg.relay.clone(),
    ));

    let state = Arc::new(AppState {
        cfg,
        relay,
        store,
        messenger,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}
