//! Dispatch behaviour observed over the wire.

use axum::http::{HeaderMap, Method, StatusCode};
use mws_server::routing::{
    handler, BodyFormat, DispatchError, MethodSet, RequestContext, RouteDef, RouteTree, Router,
    RouterOptions,
};
use mws_server::security::MemorySessionStore;
use std::sync::Arc;

mod common;

use common::{http1_client, http2_client, start_router, TRUSTED_HEADER, TRUSTED_VALUE};

async fn upload(mut ctx: RequestContext) -> Result<RequestContext, DispatchError> {
    let parts = ctx.read_multipart()?.collect_parts().await?;
    let summary = parts
        .iter()
        .map(|p| {
            format!(
                "{}|{}|{}",
                p.name.as_deref().unwrap_or("-"),
                p.filename.as_deref().unwrap_or("-"),
                String::from_utf8_lossy(&p.data)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    ctx.send_string(StatusCode::OK, HeaderMap::new(), summary)?;
    Ok(ctx)
}

async fn events(mut ctx: RequestContext) -> Result<RequestContext, DispatchError> {
    let sender = ctx.send_sse(0)?;
    sender.write("greeting", &serde_json::json!({"text": "hi"}), "1").await?;
    sender.write("", &2, "").await?;
    sender.close();
    Ok(ctx)
}

async fn page(mut ctx: RequestContext) -> Result<RequestContext, DispatchError> {
    let body = "tiddler text ".repeat(400);
    ctx.send_response(StatusCode::OK, HeaderMap::new(), body)?;
    Ok(ctx)
}

async fn failing(_ctx: RequestContext) -> Result<RequestContext, DispatchError> {
    Err(DispatchError::handler("store unavailable"))
}

fn test_router() -> Arc<Router> {
    let tree = RouteTree::build(
        RouteDef::new("^")
            .methods(MethodSet::standard())
            .child(
                RouteDef::new("^/upload$")
                    .methods([Method::POST])
                    .body_format(BodyFormat::Stream)
                    .handler(handler(upload)),
            )
            .child(RouteDef::new("^/events$").methods([Method::GET]).handler(handler(events)))
            .child(RouteDef::new("^/page$").methods([Method::GET]).handler(handler(page)))
            .child(RouteDef::new("^/fail$").methods([Method::GET]).handler(handler(failing))),
    )
    .unwrap();
    Arc::new(Router::new(
        tree,
        RouterOptions::default(),
        Arc::new(MemorySessionStore::new()),
    ))
}

#[tokio::test]
async fn unrecognized_method_is_405() {
    let server = start_router(test_router()).await;
    let response = http1_client()
        .request(Method::PATCH, server.url("/page"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.text().await.unwrap(), "Method not recognized");
    server.stop().await;
}

#[tokio::test]
async fn unanswered_path_is_404() {
    let server = start_router(test_router()).await;
    for client in [http1_client(), http2_client()] {
        let response = client.get(server.url("/missing")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "Not found");
    }
    server.stop().await;
}

#[tokio::test]
async fn handler_error_becomes_500() {
    let server = start_router(test_router()).await;
    let response = http2_client().get(server.url("/fail")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    server.stop().await;
}

#[tokio::test]
async fn multipart_upload_is_parsed() {
    let server = start_router(test_router()).await;
    let body = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        Hello\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.tid\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        line one\r\nline two\r\n\
        --XyZ--\r\n";

    for client in [http1_client(), http2_client()] {
        let response = client
            .post(server.url("/upload"))
            .header(TRUSTED_HEADER, TRUSTED_VALUE)
            .header("content-type", "multipart/form-data; boundary=XyZ")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.text().await.unwrap(),
            "title|-|Hello\nfile|a.tid|line one\r\nline two"
        );
    }
    server.stop().await;
}

#[tokio::test]
async fn malformed_multipart_is_a_client_error() {
    let server = start_router(test_router()).await;
    let cases = [
        ("text/plain", "not multipart".to_string()),
        ("multipart/form-data", "--XyZ--\r\n".to_string()),
        (
            "multipart/form-data; boundary=XyZ",
            "--XyZ\r\nno colon here\r\n\r\ndata\r\n--XyZ--\r\n".to_string(),
        ),
        (
            "multipart/form-data; boundary=XyZ",
            "--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\npartial".to_string(),
        ),
    ];

    for client in [http1_client(), http2_client()] {
        for (content_type, body) in &cases {
            let response = client
                .post(server.url("/upload"))
                .header(TRUSTED_HEADER, TRUSTED_VALUE)
                .header("content-type", *content_type)
                .body(body.clone())
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{content_type}");
            assert!(!response.text().await.unwrap().is_empty());
        }
    }
    server.stop().await;
}

#[tokio::test]
async fn post_to_unknown_path_is_404() {
    let server = start_router(test_router()).await;
    let response = http1_client()
        .post(server.url("/nowhere"))
        .header(TRUSTED_HEADER, TRUSTED_VALUE)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Not found");
    server.stop().await;
}

#[tokio::test]
async fn event_stream_delivers_events() {
    let server = start_router(test_router()).await;
    let response = http2_client().get(server.url("/events")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert!(response.headers().get("connection").is_none());

    let text = response.text().await.unwrap();
    assert!(text.starts_with(": This page is a server-sent event stream."));
    assert!(text.contains("event: greeting\ndata: {\"text\":\"hi\"}\nid: 1\n\n"));
    assert!(text.ends_with("data: 2\n\n"));
    server.stop().await;
}

#[tokio::test]
async fn cached_page_revalidates_with_304() {
    let server = start_router(test_router()).await;
    let client = http1_client();

    let first = client.get(server.url("/page")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["cache-control"], "max-age=0, must-revalidate");
    let etag = first.headers()["etag"].to_str().unwrap().to_string();
    assert!(first.headers().get("content-encoding").is_none());

    let second = client
        .get(server.url("/page"))
        .header("if-none-match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers()["etag"], etag.as_str());

    let compressed = client
        .get(server.url("/page"))
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(compressed.headers()["content-encoding"], "gzip");

    server.stop().await;
}
