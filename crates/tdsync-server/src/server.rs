//! The HTTP accept loop.

use crate::core::Core;
use crate::handlers;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Handle for a server running in the background.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Bind and serve until the process exits.
pub async fn serve(core: Arc<Core>) -> io::Result<()> {
    let listener =
        TcpListener::bind((core.config.host.as_str(), core.config.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        debug!("connection from {}", remote_addr);
        spawn_connection(Arc::clone(&core), stream);
    }
}

/// Bind and serve in the background; used by tests and by callers that
/// want to keep the current task.
pub async fn serve_background(core: Arc<Core>) -> io::Result<ServerHandle> {
    let listener =
        TcpListener::bind((core.config.host.as_str(), core.config.port)).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    info!("listening on http://{}", addr);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            debug!("connection from {}", remote_addr);
                            spawn_connection(Arc::clone(&core), stream);
                        }
                        Err(err) => error!("accept error: {:?}", err),
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("server shutting down");
                    break;
                }
            }
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}

fn spawn_connection(core: Arc<Core>, stream: tokio::net::TcpStream) {
    let io = TokioIo::new(stream);
    tokio::spawn(async move {
        let service = service_fn(move |req| {
            let core = Arc::clone(&core);
            async move { Ok::<_, Infallible>(handlers::handle(core, req).await) }
        });
        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            // Disconnects mid-long-poll land here; they are routine.
            debug!("connection ended: {:?}", err);
        }
    });
}
