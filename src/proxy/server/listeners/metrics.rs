use crate::configuration::MetricsConfig;
use crate::metrics_provider::METRICS_PROVIDER;
use crate::proxy::{Error, ResponseBody};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Serves Prometheus metrics on an address separate from the proxied host space.
pub struct MetricsListener {
    binding_address: SocketAddr,
}

impl MetricsListener {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            binding_address: SocketAddr::new(config.bind_address, config.port),
        }
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Serving metrics on {}", self.binding_address);
        let listener = TcpListener::bind(self.binding_address).await?;

        loop {
            let (tcp, remote_address) = listener.accept().await?;
            debug!("Accepted metrics connection from {remote_address}");

            tokio::spawn(async move {
                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(tcp), service_fn(handle_metrics_request));
                if let Err(error) = conn.await {
                    debug!("error serving metrics connection: {error}");
                }
            });
        }
    }
}

async fn handle_metrics_request(
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    Ok(metrics_response(request.method(), request.uri().path()))
}

fn metrics_response(method: &Method, path: &str) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());

    if method != Method::GET || path != "/metrics" {
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    match METRICS_PROVIDER.gather() {
        Ok((content_type, metrics)) => {
            *response.body_mut() = ResponseBody::fixed(metrics);
            if let Ok(content_type) = content_type.parse::<HeaderValue>() {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
        }
        Err(err) => {
            error!("{err}");
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    response
}
