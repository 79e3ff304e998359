use crate::proxy::challenge::Challenge;
use crate::proxy::scope::normalize_for_default_registry;
use crate::proxy::server::request_ext::InboundUrl;
use crate::proxy::{relay, Error, Proxy, ResponseBody, Upstream, UpstreamKind};
use bytes::Bytes;
use hyper::header::{HeaderValue, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{debug, instrument, warn};

impl Proxy {
    /// Re-reads the upstream challenge and relays a token request to its real realm.
    #[instrument(skip(self, inbound, authorization))]
    pub async fn handle_get_token(
        &self,
        upstream: &Upstream,
        inbound: &InboundUrl,
        authorization: Option<&HeaderValue>,
    ) -> Result<Response<ResponseBody>, Error> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("{}/v2/", upstream.origin))
            .body(Bytes::new())?;

        let response = self.fetch(UpstreamKind::Probe, request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            debug!("Upstream did not challenge, nothing to relay");
            return Ok(relay(response));
        }

        let Some(header) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|header| header.to_str().ok())
        else {
            debug!("Upstream challenge without usable WWW-Authenticate header");
            return Ok(relay(response));
        };

        let challenge = match Challenge::from_www_authenticate_header(header) {
            Ok(challenge) => challenge,
            Err(error) => {
                warn!("{error}");
                return Ok(relay(response));
            }
        };

        let scope = inbound.scope();
        let scope = if upstream.is_default_registry {
            normalize_for_default_registry(scope.as_deref())
        } else {
            scope
        };

        let token = self
            .fetch_token(&challenge, scope.as_deref(), authorization)
            .await?;

        Ok(relay(token))
    }
}
