use super::PROXY_SERVICE;
use crate::proxy::server::request_ext::InboundUrl;
use crate::proxy::{relay, Error, Proxy, ResponseBody, Upstream, UpstreamKind};
use bytes::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use tracing::{debug, instrument};

impl Proxy {
    /// Probes the upstream `/v2/` endpoint with the client's credentials. A challenge is
    /// answered with one pointing at this proxy's token endpoint.
    #[instrument(skip(self, inbound, authorization))]
    pub async fn handle_get_api_version(
        &self,
        upstream: &Upstream,
        inbound: &InboundUrl,
        authorization: Option<&HeaderValue>,
    ) -> Result<Response<ResponseBody>, Error> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(format!("{}/v2/", upstream.origin));
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = self
            .fetch(UpstreamKind::Probe, request.body(Bytes::new())?)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(relay(response));
        }

        let realm = inbound.token_realm(self.mode());
        debug!("Upstream requires authentication, advertising realm {realm}");

        let challenge = format!(r#"Bearer realm="{realm}",service="{PROXY_SERVICE}""#);
        let body = json!({ "message": "UNAUTHORIZED" });

        let res = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(WWW_AUTHENTICATE, HeaderValue::from_str(&challenge)?)
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::fixed(serde_json::to_vec(&body)?))?;

        Ok(res)
    }
}
