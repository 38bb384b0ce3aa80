// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use sentinel_forwarder::{config::ForwarderConfig, forwarder::Forwarder, trigger};

const LISTEN_HOST: [u8; 4] = [0, 0, 0, 0];
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main]
pub async fn main() {
    let config = ForwarderConfig::from_env();
    let log_level = match &config {
        Ok(c) => c.log_level.clone(),
        Err(_) => "info".to_string(),
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating forwarder config on startup: {e}");
            return;
        }
    };
    let port = config.port;

    let forwarder = match Forwarder::from_config(config) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!("Error creating forwarder on startup: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    if let Err(e) = serve(forwarder, port, cancel_token).await {
        error!("Server error: {e}");
    }
}

/// Resolves on SIGINT or, on unix, on the SIGTERM the platform sends before
/// stopping an instance.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}

async fn serve(
    forwarder: Arc<Forwarder>,
    port: u16,
    cancel_token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from((LISTEN_HOST, port));
    let listener = TcpListener::bind(&addr).await?;
    info!("Forwarder listening on {addr}");

    let server = http1::Builder::new();
    let mut joinset = JoinSet::new();

    loop {
        let conn = tokio::select! {
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok((conn, _)) => conn,
            },
            Some(finished) = joinset.join_next() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection handler panicked: {e:?}");
                    }
                }
                continue;
            },
            () = cancel_token.cancelled() => break,
        };

        let forwarder = Arc::clone(&forwarder);
        let service = service_fn(move |req: Request<Incoming>| {
            trigger::handle_request(Arc::clone(&forwarder), req)
        });
        let server = server.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(TokioIo::new(conn), service).await {
                error!("Connection error: {e}");
            }
        });
    }

    debug!("Draining {} in-flight connections", joinset.len());
    let drained = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        while joinset.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        error!("Connections still open after {SHUTDOWN_GRACE_PERIOD:?}, aborting them");
    }
    Ok(())
}
