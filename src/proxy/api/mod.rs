mod documentation;
mod forward;
mod token;
mod version;

pub const PROXY_SERVICE: &str = "cloudflare-docker-proxy";
