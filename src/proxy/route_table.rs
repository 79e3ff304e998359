use crate::configuration::Mode;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DOCKER_HUB: &str = "https://registry-1.docker.io";

const BUILTIN_ROUTES: &[(&str, &str)] = &[
    ("docker.ns2kracy.com", DOCKER_HUB),
    ("quay.ns2kracy.com", "https://quay.io"),
    ("gcr.ns2kracy.com", "https://gcr.io"),
    ("k8s-gcr.ns2kracy.com", "https://k8s.gcr.io"),
    ("k8s.ns2kracy.com", "https://registry.k8s.io"),
    ("ghcr.ns2kracy.com", "https://ghcr.io"),
    ("cloudsmith.ns2kracy.com", "https://docker.cloudsmith.io"),
    ("ecr.ns2kracy.com", "https://public.ecr.aws"),
    // staging
    ("docker-staging.ns2kracy.com", DOCKER_HUB),
];

/// Upstream registry selected for a request.
#[derive(Clone, Debug, PartialEq)]
pub struct Upstream {
    pub origin: String,
    pub is_default_registry: bool,
}

/// Static hostname to upstream origin mapping, immutable once built.
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
    #[serde(skip)]
    default_registry: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RouteTable {
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_ROUTES
                .iter()
                .map(|(host, origin)| ((*host).to_string(), (*origin).to_string())),
            DOCKER_HUB,
        )
    }

    /// Builds a table whose `default_registry` origin gets the implicit `library` namespace rules.
    pub fn new<I>(routes: I, default_registry: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            routes: routes.into_iter().collect(),
            default_registry: default_registry.to_string(),
        }
    }

    pub fn lookup(&self, hostname: &str) -> Option<&str> {
        self.routes.get(hostname).map(String::as_str)
    }

    /// Exact-match lookup, falling back to `fallback` in debug mode only.
    pub fn resolve(&self, hostname: &str, mode: Mode, fallback: Option<&str>) -> Option<Upstream> {
        let origin = match self.lookup(hostname) {
            Some(origin) => origin,
            None if mode == Mode::Debug => fallback.filter(|origin| !origin.is_empty())?,
            None => return None,
        };

        Some(Upstream {
            origin: origin.to_string(),
            is_default_registry: self.is_default_registry(origin),
        })
    }

    pub fn is_default_registry(&self, origin: &str) -> bool {
        origin == self.default_registry
    }

    pub fn routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }
}
