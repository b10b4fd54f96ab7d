use clap::Parser;
use proxy::config::Config;
use proxy::server::ProxyServer;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "igo-proxy",
    version = "0.1.0",
    about = "MySQL proxy with upstream connection pooling."
)]
struct ProxyArgs {
    /// Path to the TOML configuration file.
    #[clap(long, value_name = "PATH", default_value = "./igo.toml")]
    config: std::path::PathBuf,
    #[clap(long, value_name = "LOG_LEVEL")]
    log_level: Option<String>,
}

async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    }
}

fn main() -> anyhow::Result<()> {
    let args = ProxyArgs::parse();
    let level = Level::from_str(args.log_level.as_deref().unwrap_or("INFO"))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO"))
        .add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let config = Config::from_file(&args.config)?;
    info!("loaded configuration from {:?}", args.config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("IGO_PROXY")
        .build()?;

    runtime.block_on(async {
        let server = Arc::new(ProxyServer::new(config.server)?);
        let listener = server.bind()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let serve_task = tokio::spawn(Arc::clone(&server).serve(listener, shutdown_rx));

        let signal = shutdown_signal().await;
        info!("received {signal}, exiting");
        let _ = shutdown_tx.send(());
        // no per-session drain: in-flight connections die with the process
        serve_task.abort();
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}
