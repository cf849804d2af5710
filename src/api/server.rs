use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::shutdown::{Listener, StopSignal};

/// The HTTP front door, served until the shutdown coordinator says stop.
pub struct HttpListener {
    listener: TcpListener,
    router: Router,
}

impl HttpListener {
    pub fn new(listener: TcpListener, router: Router) -> Self {
        Self { listener, router }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for HttpListener {
    fn serve(
        self,
        stop: StopSignal,
    ) -> impl Future<Output = std::io::Result<()>> + Send + 'static {
        async move {
            // Stops accepting on `stop`, then waits for open connections to finish
            axum::serve(self.listener, self.router)
                .with_graceful_shutdown(stop.wait())
                .await
        }
    }
}
