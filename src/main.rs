use anyhow::{Context, Result};
use elios4you::client::Elios4YouClient;
use elios4you::config::Config;
use elios4you::coordinator::PollCoordinator;
use elios4you::logging::{get_logger, init_logging};
use elios4you::protocol::Command;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

enum Mode {
    Run,
    Query,
}

fn parse_args() -> (Mode, Option<String>) {
    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(a) if a == "query" => (Mode::Query, args.next()),
        Some(a) if a == "run" => (Mode::Run, args.next()),
        Some(path) => (Mode::Run, Some(path)),
        None => (Mode::Run, None),
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(p) => Config::from_file(p).with_context(|| format!("Failed to load {}", p))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (mode, path) = parse_args();
    let config = load_config(path.as_deref())?;
    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    let result = match mode {
        Mode::Run => run(config).await,
        Mode::Query => query(config).await,
    };
    elios4you::logging::shutdown();
    result
}

/// Run each read command once and print what the device answered
async fn query(config: Config) -> Result<()> {
    let client = Elios4YouClient::from_config(&config);
    for cmd in [Command::Dat, Command::Sta, Command::Inf, Command::Hwr] {
        let response = client
            .query(cmd)
            .await
            .with_context(|| format!("{} failed", cmd))?;
        println!("{}", cmd);
        let sorted: BTreeMap<_, _> = response.into_iter().collect();
        for (key, value) in sorted {
            println!("  {} = {}", key, value);
        }
    }
    client.close().await;
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let logger = get_logger("main");
    logger.info(&format!(
        "Elios4you {} starting for {}:{}",
        elios4you::VERSION,
        config.device.host,
        config.device.port
    ));

    let client = Arc::new(Elios4YouClient::from_config(&config));
    if !client.check_port().await {
        logger.warn(&format!(
            "Port {} on {} is not reachable yet; polling anyway",
            config.device.port, config.device.host
        ));
    }

    let coordinator = Arc::new(PollCoordinator::new(client.clone(), &config.polling));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Hold off until the device has identified itself
    loop {
        match coordinator.refresh().await {
            Ok(()) if client.data().has_identity() => break,
            Ok(()) => logger.warn("Device answered without a serial number; retrying"),
            Err(e) => logger.warn(&format!("Initial poll failed: {}", e)),
        }
        tokio::select! {
            _ = tokio::time::sleep(coordinator.update_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                client.close().await;
                return Ok(());
            }
        }
    }
    logger.info(&format!(
        "Connected to {} serial {}",
        client.name(),
        client.data().sn
    ));

    let poll_task = tokio::spawn(coordinator.clone().run(shutdown_rx.clone()));

    let web_task = spawn_web(&config, &client, &coordinator, shutdown_rx.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    logger.info("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poll_task.await {
        logger.error(&format!("Poll task ended abnormally: {}", e));
    }
    if let Some(task) = web_task
        && let Err(e) = task.await
    {
        logger.error(&format!("Web task ended abnormally: {}", e));
    }

    client.close().await;
    logger.info("Shutdown complete");
    Ok(())
}

#[cfg(feature = "web")]
fn spawn_web(
    config: &Config,
    client: &Arc<Elios4YouClient>,
    coordinator: &Arc<PollCoordinator>,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.web.enabled {
        return None;
    }
    let state = elios4you::web::AppState {
        config: Arc::new(config.clone()),
        client: client.clone(),
        coordinator: coordinator.clone(),
    };
    let host = config.web.host.clone();
    let port = config.web.port;
    Some(tokio::spawn(async move {
        if let Err(e) = elios4you::web::serve(state, &host, port, shutdown).await {
            get_logger("web").error(&format!("Web server error: {}", e));
        }
    }))
}

#[cfg(not(feature = "web"))]
fn spawn_web(
    _config: &Config,
    _client: &Arc<Elios4YouClient>,
    _coordinator: &Arc<PollCoordinator>,
    _shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    None
}
