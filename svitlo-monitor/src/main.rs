//! Watch a host's reachability and tell Telegram subscribers when the power goes on or off.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use svitlo_common::health::HealthRegistry;
use svitlo_common::metrics::setup_metrics_routes;
use svitlo_common::notifier::Notifier;
use svitlo_common::registry::SubscriberRegistry;
use svitlo_common::telegram::TelegramBot;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use svitlo_monitor::bot::CommandListener;
use svitlo_monitor::config::Config;
use svitlo_monitor::handlers::{app, listen};
use svitlo_monitor::poller::{LoopExit, Poller};
use svitlo_monitor::prober::PingProber;

async fn shutdown() -> std::io::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();

    let config = Config::init_from_env()?;
    config.validate()?;

    let liveness = HealthRegistry::new("liveness");
    let registry = Arc::new(SubscriberRegistry::new(&config.subscribers_path));
    let stats = registry.stats();
    info!(
        total = stats.total,
        active = stats.active,
        path = %stats.path.display(),
        "subscriber table loaded"
    );

    let bot = match &config.telegram.bot_token {
        Some(token) => match TelegramBot::new(
            config.telegram.api_url(),
            token,
            config.telegram.request_timeout.0,
        ) {
            Ok(bot) => Some(bot),
            Err(e) => {
                error!("failed to create telegram client: {}", e);
                None
            }
        },
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, state changes will only be logged");
            None
        }
    };

    let prober = PingProber::new(
        &config.target_address,
        config.probe_attempts,
        config.probe_timeout(),
    );
    info!(address = prober.address(), "monitoring target");

    let mut poller = Poller::new(prober, config.interval())
        .with_duration(config.duration())
        .with_liveness(liveness.register("poller".to_string(), config.poller_deadline()));
    if let Some(bot) = &bot {
        poller = poller.with_notifier(Notifier::new(registry.clone(), Arc::new(bot.clone())));
    }
    let state = poller.subscribe();

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        match shutdown().await {
            Ok(()) => signal_token.cancel(),
            Err(e) => error!("failed to register signal handlers: {}", e),
        }
    });

    let listener = match bot {
        Some(bot) => match bot.get_me().await {
            Ok(me) => {
                info!(bot = me.username.as_deref().unwrap_or(&me.first_name), "bot connected");
                Some(
                    CommandListener::new(
                        bot,
                        registry.clone(),
                        state,
                        config.telegram.poll_timeout(),
                        config.telegram.retry_interval.0,
                    )
                    .with_liveness(
                        liveness.register("bot".to_string(), config.telegram.listener_deadline()),
                    ),
                )
            }
            Err(e) => {
                error!("bot initialization failed, commands disabled: {}", e);
                None
            }
        },
        None => None,
    };
    let listener_task = listener.map(|listener| tokio::spawn(listener.run(shutdown_token.clone())));

    let router = app(liveness.clone());
    let router = match setup_metrics_routes(router.clone()) {
        Ok(with_metrics) => with_metrics,
        Err(e) => {
            error!("failed to install metrics recorder: {}", e);
            router
        }
    };
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(e) = listen(router, bind).await {
            error!("http server failed, monitoring continues: {}", e);
        }
    });

    let exit = tokio::spawn(poller.run(shutdown_token.clone())).await?;
    shutdown_token.cancel();
    if let Some(task) = listener_task {
        if let Err(e) = task.await {
            error!("bot listener failed: {}", e);
        }
    }

    match exit {
        LoopExit::Completed => info!("monitoring finished after the configured duration"),
        LoopExit::Stopped => info!("monitoring stopped"),
    }

    Ok(())
}
