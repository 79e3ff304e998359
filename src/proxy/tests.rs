use super::*;
use crate::configuration::{Mode, ProxyConfig};
use crate::proxy::server::handle_request;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION, WWW_AUTHENTICATE};
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::{body_string, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCKER_HOST: &str = "docker.ns2kracy.com";
const QUAY_HOST: &str = "quay.ns2kracy.com";

fn build_proxy(mode: Mode, target_upstream: Option<String>, routes: RouteTable) -> Arc<Proxy> {
    let config = ProxyConfig {
        mode,
        target_upstream,
        ..ProxyConfig::default()
    };
    Arc::new(Proxy::new(&config, Arc::new(routes)).unwrap())
}

/// `docker.ns2kracy.com` is the default registry served by `origin`.
fn docker_hub_proxy(mode: Mode, origin: &str) -> Arc<Proxy> {
    let routes = RouteTable::new([(DOCKER_HOST.to_string(), origin.to_string())], origin);
    build_proxy(mode, None, routes)
}

/// `quay.ns2kracy.com` is a non-default registry served by `origin`.
fn quay_proxy(origin: &str) -> Arc<Proxy> {
    let routes = RouteTable::new(
        [(QUAY_HOST.to_string(), origin.to_string())],
        route_table::DOCKER_HUB,
    );
    build_proxy(Mode::Production, None, routes)
}

fn get(host: &str, uri: &str) -> Request<Empty<Bytes>> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(HOST, host)
        .body(Empty::new())
        .unwrap()
}

async fn send<B>(proxy: &Arc<Proxy>, request: Request<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<http_client::BoxError>,
{
    handle_request(Arc::clone(proxy), request).await.unwrap()
}

async fn body_bytes(response: Response<ResponseBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: Response<ResponseBody>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn mount_challenge(server: &MockServer, service: &str) {
    let challenge = format!(r#"Bearer realm="{}/token",service="{service}""#, server.uri());

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(418))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", challenge.as_str())
                .set_body_json(json!({"errors": [{"code": "UNAUTHORIZED"}]})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_documentation_on_any_host() {
    let proxy = build_proxy(Mode::Production, None, RouteTable::builtin());

    for host in [DOCKER_HOST, "unknown.host"] {
        let response = send(&proxy, get(host, "/")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/html");
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).contains("<html"));
    }
}

#[tokio::test]
async fn test_unknown_host_lists_routes() {
    let proxy = build_proxy(Mode::Production, None, RouteTable::builtin());

    let response = send(&proxy, get("unknown.host", "/anything")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(
        body["routes"],
        serde_json::to_value(RouteTable::builtin()).unwrap()
    );
    assert_eq!(body["routes"][DOCKER_HOST], route_table::DOCKER_HUB);
    assert_eq!(body["routes"].as_object().unwrap().len(), 9);
}

#[tokio::test]
async fn test_unknown_host_in_debug_without_fallback() {
    let proxy = build_proxy(Mode::Debug, None, RouteTable::builtin());

    let response = send(&proxy, get("localhost:8000", "/v2/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_version_rewrites_challenge() {
    let server = MockServer::start().await;
    mount_challenge(&server, "registry.docker.io").await;

    let proxy = docker_hub_proxy(Mode::Production, &server.uri());
    let response = send(&proxy, get(DOCKER_HOST, "/v2/")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(WWW_AUTHENTICATE).unwrap(),
        r#"Bearer realm="https://docker.ns2kracy.com/v2/auth",service="cloudflare-docker-proxy""#
    );
    assert_eq!(body_json(response).await, json!({"message": "UNAUTHORIZED"}));
}

#[tokio::test]
async fn test_api_version_debug_realm_keeps_port() {
    let server = MockServer::start().await;
    mount_challenge(&server, "registry.docker.io").await;

    let routes = RouteTable::new(Vec::<(String, String)>::new(), route_table::DOCKER_HUB);
    let proxy = build_proxy(Mode::Debug, Some(server.uri()), routes);
    let response = send(&proxy, get("localhost:8000", "/v2/")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(WWW_AUTHENTICATE).unwrap(),
        r#"Bearer realm="http://localhost:8000/v2/auth",service="cloudflare-docker-proxy""#
    );
}

#[tokio::test]
async fn test_api_version_forwards_authorization_and_relays_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .and(header("Authorization", "Bearer client-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Distribution-API-Version", "registry/2.0")
                .set_body_string("{}"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let mut request = get(QUAY_HOST, "/v2/");
    request
        .headers_mut()
        .insert(AUTHORIZATION, "Bearer client-token".parse().unwrap());
    request
        .headers_mut()
        .insert("x-not-forwarded", "1".parse().unwrap());

    let response = send(&proxy, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Docker-Distribution-API-Version")
            .unwrap(),
        "registry/2.0"
    );
    assert_eq!(body_bytes(response).await, Bytes::from("{}"));

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("x-not-forwarded").is_none());
}

#[tokio::test]
async fn test_token_relay_normalizes_scope_on_default_registry() {
    let server = MockServer::start().await;
    mount_challenge(&server, "registry.docker.io").await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "registry.docker.io"))
        .and(query_param("scope", "repository:library/nginx:pull"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "issued", "expires_in": 300})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = docker_hub_proxy(Mode::Production, &server.uri());
    let mut request = get(DOCKER_HOST, "/v2/auth?scope=repository:nginx:pull");
    request
        .headers_mut()
        .insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());

    let response = send(&proxy, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"token": "issued", "expires_in": 300})
    );
}

#[tokio::test]
async fn test_token_relay_keeps_scope_on_other_registries() {
    let server = MockServer::start().await;
    mount_challenge(&server, "quay.io").await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "quay.io"))
        .and(query_param("scope", "repository:nginx:pull"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/auth?scope=repository:nginx:pull")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from("token"));
}

#[tokio::test]
async fn test_token_relay_relays_realm_errors() {
    let server = MockServer::start().await;
    mount_challenge(&server, "registry.docker.io").await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"details": "incorrect username"})),
        )
        .mount(&server)
        .await;

    let proxy = docker_hub_proxy(Mode::Production, &server.uri());
    let mut request = get(DOCKER_HOST, "/v2/auth?scope=repository:nginx:pull");
    request
        .headers_mut()
        .insert(AUTHORIZATION, "Basic bad".parse().unwrap());

    let response = send(&proxy, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({"details": "incorrect username"})
    );
}

#[tokio::test]
async fn test_token_relay_without_challenge_returns_probe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("open registry"))
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/auth?scope=repository:a/b:pull")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from("open registry"));
}

#[tokio::test]
async fn test_token_relay_without_authenticate_header_returns_probe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("no challenge"))
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/auth")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    assert_eq!(body_bytes(response).await, Bytes::from("no challenge"));
}

#[tokio::test]
async fn test_token_relay_with_malformed_challenge_returns_probe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", r#"Basic realm="registry""#)
                .set_body_string("basic only"),
        )
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/auth")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(WWW_AUTHENTICATE).unwrap(),
        r#"Basic realm="registry""#
    );
    assert_eq!(body_bytes(response).await, Bytes::from("basic only"));
}

#[tokio::test]
async fn test_library_redirect_on_default_registry() {
    let server = MockServer::start().await;
    let proxy = docker_hub_proxy(Mode::Production, &server.uri());

    let response = send(&proxy, get(DOCKER_HOST, "/v2/nginx/manifests/latest?ns=docker.io")).await;

    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "https://docker.ns2kracy.com/v2/library/nginx/manifests/latest?ns=docker.io"
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_forward_qualified_image_on_default_registry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/library/nginx/manifests/latest"))
        .and(header("Accept", "application/vnd.oci.image.index.v1+json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", "sha256:abc")
                .set_body_raw("manifest", "application/vnd.oci.image.index.v1+json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = docker_hub_proxy(Mode::Production, &server.uri());
    let mut request = get(DOCKER_HOST, "/v2/library/nginx/manifests/latest");
    request.headers_mut().insert(
        ACCEPT,
        "application/vnd.oci.image.index.v1+json".parse().unwrap(),
    );

    let response = send(&proxy, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("Docker-Content-Digest").unwrap(),
        "sha256:abc"
    );
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/vnd.oci.image.index.v1+json"
    );
    assert_eq!(body_bytes(response).await, Bytes::from("manifest"));
}

#[tokio::test]
async fn test_forward_keeps_query_and_drops_proxy_host() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/org/app/tags/list"))
        .and(query_param("n", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tags"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/org/app/tags/list?n=10")).await;

    assert_eq!(response.status(), StatusCode::OK);

    let received = server.received_requests().await.unwrap();
    let host = received[0].headers.get("host").unwrap().to_str().unwrap();
    assert_ne!(host, QUAY_HOST);
}

#[tokio::test]
async fn test_forward_relays_method_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v2/org/app/manifests/v1"))
        .and(header("Content-Type", "application/vnd.oci.image.manifest.v1+json"))
        .and(body_string("{\"schemaVersion\":2}"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/v2/org/app/manifests/v1")
        .header(HOST, QUAY_HOST)
        .header(CONTENT_TYPE, "application/vnd.oci.image.manifest.v1+json")
        .body(Full::new(Bytes::from("{\"schemaVersion\":2}")))
        .unwrap();

    let response = send(&proxy, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_forward_replays_put_after_found_redirect() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v2/org/app/manifests/v1"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/elsewhere"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/elsewhere"))
        .and(body_string("data"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/v2/org/app/manifests/v1")
        .header(HOST, QUAY_HOST)
        .body(Full::new(Bytes::from("data")))
        .unwrap();

    let response = send(&proxy, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_forward_streams_bodies_over_buffer_limit() {
    let server = MockServer::start().await;
    let payload = "x".repeat(64);

    Mock::given(method("PATCH"))
        .and(path("/v2/org/app/blobs/uploads/abc"))
        .and(body_string(payload.as_str()))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/elsewhere"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let routes = RouteTable::new([(QUAY_HOST.to_string(), server.uri())], route_table::DOCKER_HUB);
    let config = ProxyConfig {
        max_buffered_body: 8,
        ..ProxyConfig::default()
    };
    let proxy = Arc::new(Proxy::new(&config, Arc::new(routes)).unwrap());

    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/v2/org/app/blobs/uploads/abc")
        .header(HOST, QUAY_HOST)
        .body(Full::new(Bytes::from(payload.clone())))
        .unwrap();

    let response = send(&proxy, request).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get(LOCATION).unwrap(), "/elsewhere");
}

#[tokio::test]
async fn test_mixed_case_host_is_routed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/org/app/manifests/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("manifest"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get("Quay.NS2Kracy.com", "/v2/org/app/manifests/latest")).await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forward_relays_upstream_errors_unchanged() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/org/missing/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"errors": [{"code": "MANIFEST_UNKNOWN"}]})),
        )
        .mount(&server)
        .await;

    let proxy = quay_proxy(&server.uri());
    let response = send(&proxy, get(QUAY_HOST, "/v2/org/missing/manifests/latest")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({"errors": [{"code": "MANIFEST_UNKNOWN"}]})
    );
}

#[tokio::test]
async fn test_debug_fallback_forwards_unknown_host() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/org/app/manifests/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fallback"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = build_proxy(Mode::Debug, Some(server.uri()), RouteTable::builtin());
    let response = send(&proxy, get("localhost:8000", "/v2/org/app/manifests/latest")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from("fallback"));
}

#[tokio::test]
async fn test_upstream_transport_failure_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let proxy = quay_proxy(&origin);
    let response = send(&proxy, get(QUAY_HOST, "/v2/")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "UPSTREAM_UNAVAILABLE");
}
