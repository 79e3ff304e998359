use crate::proxy::route_table::Upstream;

#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    Documentation,
    UnknownHost,
    ApiVersion { upstream: Upstream },
    Token { upstream: Upstream },
    LibraryRedirect { path: String },
    Forward { upstream: Upstream },
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Route::Documentation => "documentation",
            Route::UnknownHost => "unknown_host",
            Route::ApiVersion { .. } => "api_version",
            Route::Token { .. } => "token",
            Route::LibraryRedirect { .. } => "library_redirect",
            Route::Forward { .. } => "forward",
        }
    }
}
