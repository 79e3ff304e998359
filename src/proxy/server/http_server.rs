use crate::metrics_provider::METRICS_PROVIDER;
use crate::proxy::http_client::{BoxError, ForwardBody};
use crate::proxy::server::request_ext::InboundUrl;
use crate::proxy::server::route::Route;
use crate::proxy::server::router;
use crate::proxy::{Error, Proxy, ResponseBody};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub async fn serve_request<S>(stream: TokioIo<S>, context: Arc<Proxy>, timeouts: Arc<[Duration; 2]>)
where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request)),
    );
    pin!(conn);

    METRICS_PROVIDER.metric_http_request_in_flight.inc();

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    METRICS_PROVIDER.metric_http_request_in_flight.dec();
}

#[instrument(skip(context, request))]
pub async fn handle_request<B>(
    context: Arc<Proxy>,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();

    let inbound = InboundUrl::from_parts(&parts, context.mode());
    let route = router::parse(&inbound.path, context.resolve(&inbound.hostname));
    let route_name = route.name();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match dispatch(&context, route, &inbound, parts, body).await {
        Ok(response) => response,
        Err(error) => {
            let details = trace_id
                .as_ref()
                .map(|trace_id| json!({"trace_id": trace_id}))
                .unwrap_or(json!({}));
            proxy_error_to_response(&error, details)
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER
        .metric_http_request_total
        .with_label_values(&[route_name])
        .inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .observe(elapsed);

    let host = &inbound.host;
    let path = &inbound.path;
    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {host}{path}")
    } else {
        format!("{elapsed:?} - {status} {method} {host}{path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

async fn dispatch<B>(
    context: &Proxy,
    route: Route,
    inbound: &InboundUrl,
    parts: Parts,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let authorization = parts.headers.get(AUTHORIZATION).cloned();

    match route {
        Route::Documentation => context.handle_documentation(),
        Route::UnknownHost => context.handle_unknown_host(),
        Route::ApiVersion { upstream } => {
            context
                .handle_get_api_version(&upstream, inbound, authorization.as_ref())
                .await
        }
        Route::Token { upstream } => {
            context
                .handle_get_token(&upstream, inbound, authorization.as_ref())
                .await
        }
        Route::LibraryRedirect { path } => context.handle_library_redirect(inbound, &path),
        Route::Forward { upstream } => {
            let body = read_forward_body(body, context.max_buffered_body()).await?;
            context.handle_forward(&upstream, parts, body).await
        }
    }
}

/// Buffers bodies of a known size up to `limit`; anything else is streamed through.
async fn read_forward_body<B>(body: B, limit: u64) -> Result<ForwardBody, Error>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    match body.size_hint().exact() {
        Some(length) if length <= limit => {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let body = Limited::new(body, limit)
                .collect()
                .await
                .map_err(|error| Error::Internal(format!("Unable to read request body: {error}")))?
                .to_bytes();
            Ok(ForwardBody::Buffered(body))
        }
        _ => {
            debug!("Streaming request body upstream");
            let body = body.map_err(|error| -> BoxError { error.into() });
            Ok(ForwardBody::Streamed(body.boxed_unsync()))
        }
    }
}

pub fn proxy_error_to_response<T>(error: &Error, details: T) -> Response<ResponseBody>
where
    T: Serialize,
{
    let (status, code) = match error {
        Error::MalformedChallenge(_) | Error::UpstreamTransport(_) | Error::InvalidUpstream(_) => {
            (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE")
        }
        Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
    };

    let body = json!({
        "errors": [{
            "code": code,
            "message": error.to_string(),
            "detail": details
        }]
    });

    let mut response = Response::new(ResponseBody::fixed(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
