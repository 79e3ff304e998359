use crate::configuration;
use crate::proxy::Error;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, AUTHORIZATION, CONNECTION, LOCATION};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use std::sync::Arc;
use tracing::{debug, warn};

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

const REQUEST_BODY_HEADERS: [&str; 5] = [
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
];

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body sent upstream: a replayable buffer or a one-shot stream.
pub type UpstreamBody = UnsyncBoxBody<Bytes, BoxError>;

/// Forwarded request body, buffered when small enough to replay across redirects.
pub enum ForwardBody {
    Buffered(Bytes),
    Streamed(UpstreamBody),
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, UpstreamBody>,
    max_redirect: u8,
}

#[derive(Clone, Debug, Default)]
pub struct HttpClientConfig {
    pub server_ca_bundle: Option<String>,
    pub max_redirect: Option<u8>,
}

/// Removes connection-scoped headers that must not be relayed between hops, including
/// those the `Connection` header names.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for header in named {
        headers.remove(header);
    }
    for header in HOP_BY_HOP_HEADERS {
        headers.remove(header);
    }
}

pub fn full_body(bytes: Bytes) -> UpstreamBody {
    Full::new(bytes)
        .map_err(|never| match never {})
        .boxed_unsync()
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, configuration::Error> {
        let tls_config = build_tls_config(config.server_ca_bundle)?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            max_redirect: config.max_redirect.unwrap_or(20),
        })
    }

    /// Sends `request` upstream, following redirects. The body is replayed on every hop.
    pub async fn request(&self, request: Request<Bytes>) -> Result<Response<Incoming>, Error> {
        let (parts, mut body) = request.into_parts();
        let mut method = parts.method;
        let mut uri = parts.uri;
        let mut headers = parts.headers;
        let mut redirects = 0;

        loop {
            let mut request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .body(full_body(body.clone()))?;
            *request.headers_mut() = headers.clone();

            debug!("Requesting from upstream: {method} {uri}");
            let response = self.client.request(request).await?;
            let status = response.status();

            if !is_followed_redirect(status) {
                return Ok(response);
            }

            let Some(location) = response.headers().get(LOCATION) else {
                return Ok(response);
            };

            if redirects >= self.max_redirect {
                return Err(Error::UpstreamTransport("Too many redirects".to_string()));
            }

            let location = location
                .to_str()
                .map_err(|_| Error::InvalidUpstream("Non-ASCII Location header".to_string()))?;
            let next_uri = resolve_location(&uri, location)?;

            if redirect_switches_to_get(status, &method) {
                method = Method::GET;
                body = Bytes::new();
                for header in REQUEST_BODY_HEADERS {
                    headers.remove(header);
                }
            }

            if next_uri.scheme() != uri.scheme() || next_uri.authority() != uri.authority() {
                headers.remove(AUTHORIZATION);
            }

            debug!("Following {status} redirect to {next_uri}");
            uri = next_uri;
            redirects += 1;
        }
    }

    /// Sends `request` upstream once. A streamed body cannot be replayed, so redirects are
    /// handed back to the caller.
    pub async fn stream(
        &self,
        request: Request<UpstreamBody>,
    ) -> Result<Response<Incoming>, Error> {
        debug!(
            "Streaming request to upstream: {} {}",
            request.method(),
            request.uri()
        );
        let response = self.client.request(request).await?;

        if is_followed_redirect(response.status()) {
            debug!("Not following {} redirect for a streamed body", response.status());
        }

        Ok(response)
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn redirect_switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        StatusCode::SEE_OTHER => method != Method::GET && method != Method::HEAD,
        _ => false,
    }
}

fn resolve_location(current: &Uri, location: &str) -> Result<Uri, Error> {
    let scheme = current.scheme_str().unwrap_or("https");
    let authority = current
        .authority()
        .map(ToString::to_string)
        .unwrap_or_default();

    let resolved = if location.starts_with("//") {
        format!("{scheme}:{location}")
    } else if location.starts_with('/') {
        format!("{scheme}://{authority}{location}")
    } else if location.contains("://") {
        location.to_string()
    } else {
        let path = current.path();
        let directory = path.rfind('/').map_or("/", |index| &path[..=index]);
        format!("{scheme}://{authority}{directory}{location}")
    };

    Ok(resolved.parse::<Uri>()?)
}

fn build_tls_config(ca_bundle: Option<String>) -> Result<rustls::ClientConfig, configuration::Error> {
    let mut root_store = RootCertStore::empty();

    let certs = if let Some(bundle) = ca_bundle {
        CertificateDer::pem_file_iter(bundle)?.collect::<Result<Vec<_>, _>>()?
    } else {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            warn!("Unable to load native certificate: {error}");
        }
        native.certs
    };

    root_store.add_parsable_certificates(certs);

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth())
}
