use crate::proxy::{Error, Proxy, ResponseBody};
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use serde_json::json;

static DOCUMENTATION: &str = include_str!("help.html");

impl Proxy {
    pub fn handle_documentation(&self) -> Result<Response<ResponseBody>, Error> {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html")
            .body(ResponseBody::fixed(DOCUMENTATION))?;

        Ok(res)
    }

    /// Diagnostic answer for hosts without an upstream: the whole route table.
    pub fn handle_unknown_host(&self) -> Result<Response<ResponseBody>, Error> {
        let body = json!({ "routes": self.routes() });

        let res = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::fixed(serde_json::to_vec(&body)?))?;

        Ok(res)
    }
}
