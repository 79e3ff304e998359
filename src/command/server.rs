use crate::command;
use crate::configuration::{self, Configuration};
use crate::proxy::server::listeners::insecure::InsecureListener;
use crate::proxy::server::listeners::metrics::MetricsListener;
use crate::proxy::{Proxy, RouteTable};
use argh::FromArgs;
use std::sync::Arc;
use tracing::error;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "serve", description = "Run the proxy listeners")]
pub struct Options {}

pub struct Command {
    routes: Arc<RouteTable>,
    listener: InsecureListener,
    metrics: Option<MetricsListener>,
}

impl Command {
    pub fn new(config: &Configuration, routes: Arc<RouteTable>) -> Result<Command, configuration::Error> {
        let context = Proxy::new(&config.proxy, Arc::clone(&routes))?;
        let listener = InsecureListener::new(&config.server, context);
        let metrics = config.metrics.as_ref().map(MetricsListener::new);

        Ok(Command {
            routes,
            listener,
            metrics,
        })
    }

    /// Swaps in a proxy built from `config`. Listener addresses are not rebound.
    pub fn notify_config_change(&self, config: &Configuration) -> Result<(), configuration::Error> {
        let context = Proxy::new(&config.proxy, Arc::clone(&self.routes))?;
        self.listener.notify_config_change(&config.server, context);
        Ok(())
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        match &self.metrics {
            Some(metrics) => {
                tokio::select! {
                    res = self.listener.serve() => res?,
                    res = metrics.serve() => {
                        if let Err(err) = &res {
                            error!("Metrics listener stopped: {err}");
                        }
                        res?;
                    }
                }
            }
            None => self.listener.serve().await?,
        }

        Ok(())
    }
}
