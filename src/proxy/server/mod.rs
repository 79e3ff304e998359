pub mod http_server;
pub mod listeners;
pub mod request_ext;
pub mod response_body;
pub mod route;
pub mod router;

pub use http_server::{handle_request, serve_request};
