use crate::proxy::Error;
use regex::Regex;
use std::sync::LazyLock;

static QUOTED_PARAMETER_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"="((?:\\.|[^"\\])*)""#).unwrap());

/// Bearer challenge advertised by an upstream registry.
///
/// Values are taken by position: the first quoted parameter is the realm, the second the
/// service. Parameter names are not checked.
#[derive(Clone, Debug, PartialEq)]
pub struct Challenge {
    pub realm: String,
    pub service: String,
}

impl Challenge {
    pub fn from_www_authenticate_header(header: &str) -> Result<Self, Error> {
        let mut values = QUOTED_PARAMETER_VALUE
            .captures_iter(header)
            .filter_map(|captures| captures.get(1))
            .map(|value| value.as_str().to_string());

        match (values.next(), values.next()) {
            (Some(realm), Some(service)) => Ok(Self { realm, service }),
            _ => Err(Error::MalformedChallenge(header.to_string())),
        }
    }
}
