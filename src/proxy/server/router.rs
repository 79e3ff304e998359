use super::route::Route;
use crate::proxy::route_table::Upstream;

const LIBRARY_NAMESPACE: &str = "library";

pub fn parse(path: &str, upstream: Option<Upstream>) -> Route {
    if path == "/" {
        return Route::Documentation;
    }

    let Some(upstream) = upstream else {
        return Route::UnknownHost;
    };

    match path {
        "/v2/" => Route::ApiVersion { upstream },
        "/v2/auth" => Route::Token { upstream },
        _ if upstream.is_default_registry => match library_image_path(path) {
            Some(path) => Route::LibraryRedirect { path },
            None => Route::Forward { upstream },
        },
        _ => Route::Forward { upstream },
    }
}

/// Rewrites `/v2/<name>/<kind>/<reference>` to `/v2/library/<name>/<kind>/<reference>`.
///
/// Only paths of exactly five `/`-separated segments (leading empty one included) that have no
/// `library` segment anywhere are rewritten.
pub fn library_image_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = path.split('/').collect();

    if segments.len() != 5 || segments.contains(&LIBRARY_NAMESPACE) {
        return None;
    }

    segments.insert(2, LIBRARY_NAMESPACE);
    Some(segments.join("/"))
}
