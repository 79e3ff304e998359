use crate::configuration::ServerConfig;
use crate::proxy::server::serve_request;
use crate::proxy::{Error, Proxy};
use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct InsecureListener {
    binding_address: SocketAddr,
    context: ArcSwap<Proxy>,
    timeouts: ArcSwap<[Duration; 2]>,
}

impl InsecureListener {
    pub fn new(server_config: &ServerConfig, context: Proxy) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);

        Self {
            binding_address,
            context: ArcSwap::from_pointee(context),
            timeouts: ArcSwap::from_pointee(Self::timeouts(server_config)),
        }
    }

    fn timeouts(server_config: &ServerConfig) -> [Duration; 2] {
        [
            Duration::from_secs(server_config.query_timeout),
            Duration::from_secs(server_config.query_timeout_grace_period),
        ]
    }

    /// New connections pick up `context`; established ones keep the one they started with.
    pub fn notify_config_change(&self, server_config: &ServerConfig, context: Proxy) {
        self.context.store(Arc::new(context));
        self.timeouts.store(Arc::new(Self::timeouts(server_config)));
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {} (non-TLS)", self.binding_address);
        let listener = TcpListener::bind(self.binding_address).await?;

        loop {
            debug!("Waiting for incoming connection");
            let (tcp, remote_address) = listener.accept().await?;

            debug!("Accepted connection from {remote_address}");
            let stream = TokioIo::new(tcp);
            let context = Arc::clone(&self.context.load());
            let timeouts = Arc::clone(&self.timeouts.load());

            tokio::spawn(Box::pin(serve_request(stream, context, timeouts)));
        }
    }
}
