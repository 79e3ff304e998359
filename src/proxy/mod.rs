use crate::configuration::{self, Mode, ProxyConfig};
use crate::metrics_provider::METRICS_PROVIDER;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::fmt::Debug;
use std::sync::Arc;

mod api;
pub mod challenge;
mod error;
pub mod http_client;
pub mod route_table;
pub mod scope;
pub mod server;
#[cfg(test)]
mod tests;
pub mod token_relay;

use http_client::{strip_hop_by_hop_headers, HttpClient, HttpClientConfig, UpstreamBody};
pub use error::Error;
pub use route_table::{RouteTable, Upstream};
pub use server::response_body::ResponseBody;

#[derive(Clone, Copy, Debug)]
pub enum UpstreamKind {
    Probe,
    Token,
    Forward,
}

impl UpstreamKind {
    fn as_str(self) -> &'static str {
        match self {
            UpstreamKind::Probe => "probe",
            UpstreamKind::Token => "token",
            UpstreamKind::Forward => "forward",
        }
    }
}

/// Per-configuration proxy state shared by every request.
pub struct Proxy {
    routes: Arc<RouteTable>,
    client: HttpClient,
    mode: Mode,
    target_upstream: Option<String>,
    max_buffered_body: u64,
}

impl Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("mode", &self.mode)
            .field("target_upstream", &self.target_upstream)
            .field("max_buffered_body", &self.max_buffered_body)
            .finish_non_exhaustive()
    }
}

impl Proxy {
    pub fn new(config: &ProxyConfig, routes: Arc<RouteTable>) -> Result<Self, configuration::Error> {
        let client = HttpClient::new(HttpClientConfig {
            server_ca_bundle: config.server_ca_bundle.clone(),
            max_redirect: Some(config.max_redirect),
        })?;

        Ok(Self {
            routes,
            client,
            mode: config.mode,
            target_upstream: config.target_upstream.clone(),
            max_buffered_body: config.max_buffered_body,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn max_buffered_body(&self) -> u64 {
        self.max_buffered_body
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn resolve(&self, hostname: &str) -> Option<Upstream> {
        self.routes
            .resolve(hostname, self.mode, self.target_upstream.as_deref())
    }

    async fn fetch(
        &self,
        kind: UpstreamKind,
        request: Request<Bytes>,
    ) -> Result<Response<Incoming>, Error> {
        let result = self.client.request(request).await;
        record_upstream_outcome(kind, result.is_ok());
        result
    }

    async fn fetch_streamed(
        &self,
        kind: UpstreamKind,
        request: Request<UpstreamBody>,
    ) -> Result<Response<Incoming>, Error> {
        let result = self.client.stream(request).await;
        record_upstream_outcome(kind, result.is_ok());
        result
    }
}

fn record_upstream_outcome(kind: UpstreamKind, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    METRICS_PROVIDER
        .metric_upstream_request_total
        .with_label_values(&[kind.as_str(), outcome])
        .inc();
}

/// Hands an upstream response back to the client as-is, minus connection-scoped headers.
fn relay(response: Response<Incoming>) -> Response<ResponseBody> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, ResponseBody::Upstream(body))
}
