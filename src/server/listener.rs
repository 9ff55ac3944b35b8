use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{Instrument, info};

use crate::context::InstanceContext;
use crate::http::connection::{Connection, RequestLimits};
use crate::proxy::forwarder::Forwarder;
use crate::resolver::Resolve;

pub async fn bind(listen_addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))
}

/// Accepts connections forever, one task per connection.
///
/// Every task runs inside the instance span of `ctx` plus a span naming
/// the peer.
pub async fn serve<R: Resolve>(
    listener: TcpListener,
    forwarder: Arc<Forwarder<R>>,
    limits: RequestLimits,
    ctx: InstanceContext,
) -> anyhow::Result<()> {
    accept_loop(listener, forwarder, limits)
        .instrument(ctx.span())
        .await
}

async fn accept_loop<R: Resolve>(
    listener: TcpListener,
    forwarder: Arc<Forwarder<R>>,
    limits: RequestLimits,
) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let forwarder = forwarder.clone();
        let span = tracing::info_span!("conn", %peer);
        tokio::spawn(
            async move {
                let mut conn = Connection::new(socket, forwarder, limits);
                if let Err(e) = conn.run().await {
                    tracing::error!("Connection error from {}: {}", peer, e);
                }
            }
            .instrument(span),
        );
    }
}
