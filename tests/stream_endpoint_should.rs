// these run the whole router against a local upstream, nothing leaves the machine
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body, http::Request, http::StatusCode, response::Response};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

use kitanime_stream::server::services::{
    DynUpstreamService, MediaServices, upstream_services::UpstreamService,
};
use kitanime_stream::{AppConfig, ApplicationServer, CargoEnv};

fn app_with(config: AppConfig) -> Router {
    // no env proxies, wiremock lives on loopback
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let upstream = Arc::new(UpstreamService::from_client(client)) as DynUpstreamService;
    ApplicationServer::router(MediaServices::with_upstream(Arc::new(config), upstream))
}

fn app() -> Router {
    app_with(AppConfig {
        // lets the local mock act as a player host
        intermediate_hosts: vec!["127.0.0.1".to_string()],
        ..Default::default()
    })
}

fn media_uri(route: &str, source: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", source)
        .finish();
    format!("{}?{}", route, query)
}

async fn get(app: Router, uri: &str, range: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(range) = range {
        builder = builder.header("range", range);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// upstream for one connection: reads the request, writes `response` as is, keeps the
/// socket open for `hold` and then drops it
async fn raw_upstream(response: &'static [u8], hold: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        socket.write_all(response).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(hold).await;
    });

    format!("http://{}", addr)
}

fn authority(server: &MockServer) -> String {
    server.uri().trim_start_matches("http://").to_string()
}

async fn mount_player_page(server: &MockServer) -> String {
    let media_url = format!("{}/media/ep01.mp4", server.uri());
    let html = format!(
        r#"<html><body><div id="player"></div>
        <script>jwplayer("player").setup({{ file: "{}", type: "mp4" }});</script>
        </body></html>"#,
        media_url
    );

    Mock::given(method("GET"))
        .and(path("/embed/ep01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;

    format!("{}/embed/ep01", server.uri())
}

#[tokio::test]
async fn test_missing_url_is_rejected_before_any_upstream_call() {
    let server = MockServer::start().await;

    for route in ["/stream", "/stream?url=", "/image", "/img?token=abc", "/p"] {
        let response = get(app(), route, None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", route);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(
            body_bytes(response).await,
            br#"{"error":"Missing url parameter"}"#.to_vec()
        );
    }

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_garbage_url_is_a_bad_request() {
    let response = get(app(), "/stream?url=not-a-url", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_direct_image_is_served_with_a_day_of_caching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/covers/frieren.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(b"\x89PNG fake png".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = format!("{}/covers/frieren.png", server.uri());
    let response = get(app(), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(response.headers()["cache-control"], "public, max-age=86400");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(body_bytes(response).await.starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn test_image_without_content_type_defaults_to_jpeg() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thumb"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xFF\xD8\xFF".to_vec()))
        .mount(&server)
        .await;

    let source = format!("{}/thumb", server.uri());
    let response = get(app(), &media_uri("/image", &source), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
}

#[tokio::test]
async fn test_base64_url_param_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/covers/a.webp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/webp")
                .set_body_bytes(b"RIFF".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let encoded = URL_SAFE_NO_PAD.encode(format!("{}/covers/a.webp", server.uri()));
    let response = get(app(), &format!("/image?url={}", encoded), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/webp");
}

#[tokio::test]
async fn test_catalog_image_routes_send_the_catalog_referer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/poster"))
        .and(header("referer", "https://otakudesu.best/"))
        .and(header("origin", "https://otakudesu.best"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(b"\xFF\xD8\xFF".to_vec()),
        )
        .expect(2)
        .mount(&server)
        .await;

    let source = format!("{}/uploads/poster", server.uri());
    for route in ["/img", "/p"] {
        let response = get(app(), &media_uri(route, &source), None).await;
        assert_eq!(response.status(), StatusCode::OK, "{}", route);
        assert_eq!(response.headers()["cache-control"], "public, max-age=86400");
    }
}

#[tokio::test]
async fn test_player_page_is_resolved_and_range_is_honoured() {
    let server = MockServer::start().await;
    let page_url = mount_player_page(&server).await;

    Mock::given(method("GET"))
        .and(path("/media/ep01.mp4"))
        .and(header("range", "bytes=100-"))
        .and(header("referer", page_url.as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-type", "video/mp4")
                .insert_header("content-range", "bytes 100-4999/5000")
                .set_body_bytes(vec![7u8; 4900]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = get(app(), &media_uri("/stream", &page_url), Some("bytes=100-")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 100-4999/5000");
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(body_bytes(response).await.len(), 4900);
}

#[tokio::test]
async fn test_bounded_range_on_a_direct_video() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/ep02.mp4"))
        .and(header("range", "bytes=0-999"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-999/5000")
                .set_body_bytes(vec![1u8; 1000]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = format!("{}/files/ep02.mp4", server.uri());
    let response = get(app(), &media_uri("/stream", &source), Some("bytes=0-999")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 0-999/5000");
    // no upstream content type on a video falls back to mp4
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(response.headers()["content-length"], "1000");
}

#[tokio::test]
async fn test_no_range_never_answers_partial_content() {
    let server = MockServer::start().await;
    let page_url = mount_player_page(&server).await;

    // misbehaving upstream that sends a range answer nobody asked for
    Mock::given(method("GET"))
        .and(path("/media/ep01.mp4"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-type", "video/mp4")
                .insert_header("content-range", "bytes 0-99/100")
                .set_body_bytes(vec![0u8; 100]),
        )
        .mount(&server)
        .await;

    let response = get(app(), &media_uri("/stream", &page_url), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("content-range"));

    let requests = server.received_requests().await.unwrap();
    let media_request = requests
        .iter()
        .find(|r| r.url.path() == "/media/ep01.mp4")
        .unwrap();
    assert!(!media_request.headers.contains_key("range"));
}

#[tokio::test]
async fn test_range_is_not_forwarded_for_images() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/covers/b.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
        .mount(&server)
        .await;

    let source = format!("{}/covers/b.jpg", server.uri());
    let response = get(app(), &media_uri("/image", &source), Some("bytes=0-1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].headers.contains_key("range"));
}

#[tokio::test]
async fn test_upstream_forbidden_becomes_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/locked.mp4"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let source = format!("{}/files/locked.mp4", server.uri());
    let response = get(app(), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let body = body_json(response).await;
    assert_eq!(body["error"], "Video file not found");
    assert_eq!(body["originalUrl"], source);
    assert_eq!(body["status"], 403);
}

#[tokio::test]
async fn test_player_page_without_media_becomes_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/embed/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>removed</p>"))
        .mount(&server)
        .await;

    let page_url = format!("{}/embed/gone", server.uri());
    let response = get(app(), &media_uri("/stream", &page_url), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video file not found");
    assert!(body["message"].as_str().unwrap().contains("<source>"));
}

#[tokio::test]
async fn test_upstream_server_error_is_a_streaming_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/broken.mp4"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let source = format!("{}/files/broken.mp4", server.uri());
    let response = get(app(), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video streaming failed");
}

#[tokio::test]
async fn test_unsatisfiable_range_is_passed_on() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/ep03.mp4"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let source = format!("{}/files/ep03.mp4", server.uri());
    let response = get(
        app(),
        &media_uri("/stream", &source),
        Some("bytes=999999-"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_slow_image_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/covers/slow.png"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = AppConfig {
        image_timeout_secs: 1,
        ..Default::default()
    };
    let source = format!("{}/covers/slow.png", server.uri());
    let response = get(app_with(config), &media_uri("/image", &source), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Failed to load image");
    assert!(body["message"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_production_hides_error_details() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/covers/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = AppConfig {
        cargo_env: CargoEnv::Production,
        ..Default::default()
    };
    let source = format!("{}/covers/missing.png", server.uri());
    let response = get(app_with(config), &media_uri("/image", &source), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_bytes(response).await,
        br#"{"error":"Image not found or access denied"}"#.to_vec()
    );
}

#[tokio::test]
async fn test_preflight_gets_cors_headers() {
    for route in ["/stream", "/proxy", "/image", "/img", "/p"] {
        let request = Request::builder()
            .method("OPTIONS")
            .uri(route)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK, "{}", route);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, HEAD, OPTIONS");
        assert!(
            headers["access-control-allow-headers"]
                .to_str()
                .unwrap()
                .contains("Range")
        );
        assert!(
            headers["access-control-expose-headers"]
                .to_str()
                .unwrap()
                .contains("Content-Range")
        );
    }
}

#[tokio::test]
async fn test_raw_proxy_passes_upstream_status_and_body_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/thumb"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("content-type", "text/plain")
                .set_body_string("nope"),
        )
        .mount(&server)
        .await;

    let source = format!("{}/api/thumb", server.uri());
    let response = get(app(), &media_uri("/proxy", &source), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(body_bytes(response).await, b"nope".to_vec());
}

#[tokio::test]
async fn test_raw_proxy_requires_url() {
    let response = get(app(), "/proxy", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_bytes(response).await,
        br#"{"error":"Missing url parameter"}"#.to_vec()
    );
}

#[tokio::test]
async fn test_raw_proxy_connection_failure_is_a_proxy_error() {
    // nothing listens on port 9 on loopback
    let response = get(
        app(),
        &media_uri("/proxy", "http://127.0.0.1:9/unreachable"),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Proxy error");
}

#[tokio::test]
async fn test_concurrent_requests_do_not_interfere() {
    let server = MockServer::start().await;
    for name in ["one", "two", "three"] {
        Mock::given(method("GET"))
            .and(path(format!("/covers/{}.png", name)))
            .respond_with(ResponseTemplate::new(200).set_body_string(name))
            .mount(&server)
            .await;
    }

    let app = app();
    let mut handles = Vec::new();
    for name in ["one", "two", "three"] {
        let app = app.clone();
        let source = format!("{}/covers/{}.png", server.uri(), name);
        handles.push(tokio::spawn(async move {
            let response = get(app, &media_uri("/image", &source), None).await;
            (name, body_bytes(response).await)
        }));
    }

    for handle in handles {
        let (name, body) = handle.await.unwrap();
        assert_eq!(body, name.as_bytes().to_vec());
    }
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let response = get(app(), "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert!(body["uptimeSeconds"].is_u64());
}

#[tokio::test]
async fn test_upstream_missing_file_becomes_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/gone.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = format!("{}/files/gone.mp4", server.uri());
    let response = get(app(), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video file not found");
    assert_eq!(body["status"], 404);
    assert!(body["message"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_media_redirect_to_another_host_gets_that_hosts_name() {
    let player = MockServer::start().await;
    let cdn = MockServer::start().await;
    let page_url = mount_player_page(&player).await;

    Mock::given(method("GET"))
        .and(path("/media/ep01.mp4"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/real/ep01.mp4", cdn.uri()).as_str()),
        )
        .mount(&player)
        .await;
    Mock::given(method("GET"))
        .and(path("/real/ep01.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(vec![3u8; 64]),
        )
        .expect(1)
        .mount(&cdn)
        .await;

    let response = get(app(), &media_uri("/stream", &page_url), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 64);

    let page_requests = player.received_requests().await.unwrap();
    assert_eq!(page_requests[0].headers["host"], authority(&player).as_str());

    let cdn_requests = cdn.received_requests().await.unwrap();
    assert_eq!(cdn_requests.len(), 1);
    assert_eq!(cdn_requests[0].headers["host"], authority(&cdn).as_str());
}

#[tokio::test]
async fn test_oversized_player_page_is_refused() {
    let server = MockServer::start().await;
    let mut html = "<html><body>".to_string();
    html.push_str(&"x".repeat(3 * 1024 * 1024));
    html.push_str(r#"<source src="/media/ep01.mp4"></body></html>"#);

    Mock::given(method("GET"))
        .and(path("/embed/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let page_url = format!("{}/embed/huge", server.uri());
    let response = get(app(), &media_uri("/stream", &page_url), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video streaming failed");
    assert!(body["message"].as_str().unwrap().contains("larger than"));

    // page was never scraped, so media was never requested
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/media/ep01.mp4"));
}

#[tokio::test]
async fn test_body_failing_before_the_first_byte_is_a_json_error() {
    let base = raw_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 1000\r\n\r\n",
        Duration::ZERO,
    )
    .await;

    let source = format!("{}/files/ep04.mp4", base);
    let response = get(app(), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video streaming failed");
}

#[tokio::test]
async fn test_body_failing_mid_stream_ends_the_stream() {
    let base = raw_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 1000\r\n\r\n0123456789",
        Duration::ZERO,
    )
    .await;

    let source = format!("{}/files/ep05.mp4", base);
    let response = get(app(), &media_uri("/stream", &source), None).await;

    // headers were already committed
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(response.headers()["content-length"], "1000");
    assert!(response.into_body().collect().await.is_err());
}

#[tokio::test]
async fn test_body_stalling_before_the_first_byte_times_out() {
    let base = raw_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 1000\r\n\r\n",
        Duration::from_secs(3),
    )
    .await;

    let config = AppConfig {
        media_timeout_secs: 1,
        ..Default::default()
    };
    let source = format!("{}/files/ep06.mp4", base);
    let response = get(app_with(config), &media_uri("/stream", &source), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Video streaming failed");
    assert!(body["message"].as_str().unwrap().contains("timed out"));
}
