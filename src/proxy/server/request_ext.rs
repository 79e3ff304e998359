use crate::configuration::Mode;
use hyper::header::{AsHeaderName, HOST};
use hyper::http::request::Parts;
use hyper::http::uri::Authority;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

pub trait HeaderExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
}

impl HeaderExt for Parts {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }
}

/// The URL a client addressed, as far as it can be reconstructed behind the edge.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundUrl {
    pub scheme: String,
    /// Host including any port, as sent by the client.
    pub host: String,
    /// Lowercase host without port, used for routing.
    pub hostname: String,
    pub path: String,
    pub query: Option<String>,
}

impl InboundUrl {
    pub fn from_parts(parts: &Parts, mode: Mode) -> Self {
        let host = parts
            .uri
            .authority()
            .map(ToString::to_string)
            .or_else(|| parts.get_header(HOST))
            .unwrap_or_default();

        let hostname = host
            .parse::<Authority>()
            .map_or_else(|_| host.clone(), |authority| authority.host().to_string())
            .to_ascii_lowercase();

        let scheme = parts
            .get_header(X_FORWARDED_PROTO)
            .and_then(|proto| proto.split(',').next().map(|p| p.trim().to_string()))
            .or_else(|| parts.uri.scheme_str().map(ToString::to_string))
            .unwrap_or_else(|| match mode {
                Mode::Debug => "http".to_string(),
                Mode::Production => "https".to_string(),
            });

        Self {
            scheme,
            host,
            hostname,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(ToString::to_string),
        }
    }

    /// Absolute URL on this proxy for `path`, keeping the inbound query string.
    pub fn with_path(&self, path: &str) -> String {
        match &self.query {
            Some(query) => format!("{}://{}{path}?{query}", self.scheme, self.host),
            None => format!("{}://{}{path}", self.scheme, self.host),
        }
    }

    /// The first `scope` query parameter, unless it is empty.
    pub fn scope(&self) -> Option<String> {
        self.query
            .as_deref()
            .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
            .and_then(|pairs| {
                pairs
                    .into_iter()
                    .find(|(key, _)| key == "scope")
                    .map(|(_, value)| value)
            })
            .filter(|scope| !scope.is_empty())
    }

    /// Token endpoint advertised to clients in place of the upstream realm.
    pub fn token_realm(&self, mode: Mode) -> String {
        match mode {
            Mode::Debug => format!("http://{}/v2/auth", self.host),
            Mode::Production => format!("https://{}/v2/auth", self.hostname),
        }
    }
}
