use crate::proxy::challenge::Challenge;
use crate::proxy::{Error, Proxy, UpstreamKind};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, AUTHORIZATION};
use hyper::{Method, Request, Response, Uri};
use tracing::{info, instrument};

/// Replaces the first `key` pair (dropping later duplicates) or appends one.
fn set_query_parameter(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(index) => {
            pairs[index].1 = value.to_string();
            let mut seen = 0;
            pairs.retain(|(k, _)| {
                if k != key {
                    return true;
                }
                seen += 1;
                seen == 1
            });
        }
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Builds the token URL: the challenge realm with `service` (when non-empty) and `scope`
/// (when present) set as query parameters.
pub fn token_url(challenge: &Challenge, scope: Option<&str>) -> Result<Uri, Error> {
    let realm = challenge.realm.parse::<Uri>()?;

    let (Some(scheme), Some(authority)) = (realm.scheme_str(), realm.authority()) else {
        return Err(Error::InvalidUpstream(format!(
            "token realm is not an absolute URL: {}",
            challenge.realm
        )));
    };

    let mut pairs: Vec<(String, String)> = realm
        .query()
        .and_then(|query| serde_urlencoded::from_str(query).ok())
        .unwrap_or_default();

    if !challenge.service.is_empty() {
        set_query_parameter(&mut pairs, "service", &challenge.service);
    }
    if let Some(scope) = scope.filter(|scope| !scope.is_empty()) {
        set_query_parameter(&mut pairs, "scope", scope);
    }

    let location = if pairs.is_empty() {
        format!("{scheme}://{authority}{}", realm.path())
    } else {
        let query = serde_urlencoded::to_string(&pairs)?;
        format!("{scheme}://{authority}{}?{query}", realm.path())
    };

    Ok(location.parse::<Uri>()?)
}

impl Proxy {
    /// Requests a token from the upstream realm on behalf of the client.
    #[instrument(skip(self, authorization))]
    pub async fn fetch_token(
        &self,
        challenge: &Challenge,
        scope: Option<&str>,
        authorization: Option<&HeaderValue>,
    ) -> Result<Response<Incoming>, Error> {
        let location = token_url(challenge, scope)?;
        info!("Requesting token from upstream realm: {location}");

        let mut request = Request::builder().method(Method::GET).uri(location);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        self.fetch(UpstreamKind::Token, request.body(Bytes::new())?)
            .await
    }
}
