use crate::proxy::http_client::{strip_hop_by_hop_headers, ForwardBody};
use crate::proxy::server::request_ext::InboundUrl;
use crate::proxy::{relay, Error, Proxy, ResponseBody, Upstream, UpstreamKind};
use hyper::header::LOCATION;
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, instrument};

impl Proxy {
    /// Sends the request to the same path and query on the upstream.
    #[instrument(skip(self, parts, body))]
    pub async fn handle_forward(
        &self,
        upstream: &Upstream,
        parts: Parts,
        body: ForwardBody,
    ) -> Result<Response<ResponseBody>, Error> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path(), |path_and_query| path_and_query.as_str());
        let location = format!("{}{path_and_query}", upstream.origin);

        let mut headers = parts.headers;
        strip_hop_by_hop_headers(&mut headers);

        let mut request = Request::builder()
            .method(parts.method)
            .uri(location)
            .body(())?;
        *request.headers_mut() = headers;

        let response = match body {
            ForwardBody::Buffered(body) => {
                self.fetch(UpstreamKind::Forward, request.map(|()| body))
                    .await?
            }
            ForwardBody::Streamed(body) => {
                self.fetch_streamed(UpstreamKind::Forward, request.map(|()| body))
                    .await?
            }
        };
        Ok(relay(response))
    }

    /// Points clients at the `library/` form of an unqualified image path.
    #[instrument(skip(self, inbound))]
    pub fn handle_library_redirect(
        &self,
        inbound: &InboundUrl,
        path: &str,
    ) -> Result<Response<ResponseBody>, Error> {
        let location = inbound.with_path(path);
        debug!("Redirecting unqualified image to {location}");

        let res = Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(LOCATION, location)
            .body(ResponseBody::empty())?;

        Ok(res)
    }
}
