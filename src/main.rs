use std::sync::Arc;

use dnsfwd::config::Config;
use dnsfwd::context::InstanceContext;
use dnsfwd::http::connection::RequestLimits;
use dnsfwd::proxy::Forwarder;
use dnsfwd::resolver::DnsResolver;
use dnsfwd::server::listener;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let ctx = InstanceContext::new();

    let startup = async {
        let cfg = Config::load().inspect_err(|e| tracing::error!("Invalid configuration: {:#}", e))?;

        tracing::info!(
            listen = %cfg.listen_addr,
            backend = %cfg.backend_name,
            backend_port = cfg.backend_port,
            selection = ?cfg.selection,
            "Starting server"
        );

        let forwarder = Arc::new(Forwarder::new(&cfg, DnsResolver::new()));

        // Informational only; every request resolves again
        if forwarder.resolve_backends().await.is_err() {
            tracing::info!("Serving anyway, each request resolves the backend again");
        }

        let listener = listener::bind(&cfg.listen_addr)
            .await
            .inspect_err(|e| tracing::error!("Server failed to start: {:#}", e))?;

        anyhow::Ok((cfg, forwarder, listener))
    };
    let (cfg, forwarder, tcp) = startup.instrument(ctx.span()).await?;

    tokio::select! {
        res = listener::serve(tcp, forwarder, RequestLimits::from_config(&cfg), ctx.clone()) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            ctx.span().in_scope(|| tracing::info!("Shutdown signal received"));
        }
    }

    Ok(())
}
