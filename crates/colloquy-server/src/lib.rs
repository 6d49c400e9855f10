//! HTTP server for Colloquy.
//!
//! Exposes the discussion service as JSON endpoints under `/v1`, plus a
//! server-sent-events stream of new comments per post. Each request runs in
//! its own operation scope, so comment counts are batched within a request
//! and never cached across requests.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::{BusSettings, LoaderSettings, ServerConfig, StoreConfig, StoreKind};
pub use error::{ApiError, ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::ColloquyServer;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use colloquy_service::Discussion;

    fn app() -> Router {
        build_router(AppState::new(Discussion::in_memory()), &[])
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_post(app: &Router) -> String {
        let (status, body) = send(
            app,
            json_request(Method::POST, "/v1/posts", json!({"title": "Hello", "body": "World"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn add_comment(app: &Router, post: &str, body: Value) -> (StatusCode, Value) {
        send(
            app,
            json_request(Method::POST, &format!("/v1/posts/{post}/comments"), body),
        )
        .await
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = send(&app(), get("/v1/health")).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn info_endpoint() {
        let (status, body) = send(&app(), get("/v1/info")).await;
        assert_eq!(status, 200);
        assert_eq!(body["name"], "colloquy");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn post_lifecycle() {
        let app = app();
        let id = create_post(&app).await;

        let (status, body) = send(&app, get(&format!("/v1/posts/{id}"))).await;
        assert_eq!(status, 200);
        assert_eq!(body["title"], "Hello");
        assert_eq!(body["author"], "anonymous");
        assert_eq!(body["comments_count"], 0);

        let (status, _) = add_comment(&app, &id, json!({"body": "first"})).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, get("/v1/posts")).await;
        assert_eq!(status, 200);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["comments_count"], 1);
    }

    #[tokio::test]
    async fn author_comes_from_header_when_body_has_none() {
        let app = app();
        let id = create_post(&app).await;
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/v1/posts/{id}/comments"))
            .header("content-type", "application/json")
            .header("x-user", "carol")
            .body(Body::from(json!({"body": "hi"}).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["author"], "carol");
    }

    #[tokio::test]
    async fn threaded_replies_and_parent_filter() {
        let app = app();
        let id = create_post(&app).await;
        let (_, root) = add_comment(&app, &id, json!({"body": "root"})).await;
        let root_id = root["id"].as_str().unwrap();
        let (_, reply) =
            add_comment(&app, &id, json!({"body": "reply", "parent_id": root_id})).await;
        assert_eq!(reply["depth"], 1);

        let (status, page) = send(
            &app,
            get(&format!("/v1/posts/{id}/comments?parent={root_id}")),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(page["edges"].as_array().unwrap().len(), 1);
        assert_eq!(page["edges"][0]["node"]["body"], "reply");

        let (status, comment) = send(&app, get(&format!("/v1/comments/{root_id}"))).await;
        assert_eq!(status, 200);
        assert_eq!(comment["depth"], 0);
    }

    #[tokio::test]
    async fn paging_with_cursor() {
        let app = app();
        let id = create_post(&app).await;
        for i in 0..3 {
            add_comment(&app, &id, json!({"body": format!("c{i}")})).await;
        }

        let (_, first) = send(&app, get(&format!("/v1/posts/{id}/comments?limit=2"))).await;
        assert_eq!(first["edges"].as_array().unwrap().len(), 2);
        assert_eq!(first["page_info"]["has_next_page"], true);
        let end = first["page_info"]["end_cursor"].as_str().unwrap().to_string();

        // Standard base64 may contain '+', '/' and '='; percent-encode them.
        let encoded: String = end
            .chars()
            .map(|c| match c {
                '+' => "%2B".to_string(),
                '/' => "%2F".to_string(),
                '=' => "%3D".to_string(),
                c => c.to_string(),
            })
            .collect();
        let (status, rest) = send(
            &app,
            get(&format!("/v1/posts/{id}/comments?after={encoded}&limit=10")),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(rest["edges"].as_array().unwrap().len(), 1);
        assert_eq!(rest["page_info"]["has_next_page"], false);
    }

    #[tokio::test]
    async fn error_mapping() {
        let app = app();
        let id = create_post(&app).await;

        let (status, body) = send(&app, get("/v1/posts/not-an-id")).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let missing = colloquy_types::PostId::new();
        let (status, body) = send(&app, get(&format!("/v1/posts/{missing}"))).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = send(
            &app,
            get(&format!("/v1/posts/{id}/comments?after=garbage!")),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, _) = send(&app, get(&format!("/v1/posts/{id}/comments?limit=0"))).await;
        assert_eq!(status, 400);

        let (status, body) = add_comment(&app, &id, json!({"body": "x".repeat(2001)})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn bad_json_bodies_use_error_envelope() {
        let app = app();

        let malformed = Request::builder()
            .method(Method::POST)
            .uri("/v1/posts")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, malformed).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, body) =
            send(&app, json_request(Method::POST, "/v1/posts", json!({"title": "only"}))).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let no_content_type = Request::builder()
            .method(Method::POST)
            .uri("/v1/posts")
            .body(Body::from(json!({"title": "t", "body": "b"}).to_string()))
            .unwrap();
        let (status, body) = send(&app, no_content_type).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn closed_post_is_forbidden() {
        let app = app();
        let id = create_post(&app).await;
        let (status, body) = send(
            &app,
            json_request(
                Method::PUT,
                &format!("/v1/posts/{id}/comments-closed"),
                json!({"closed": true}),
            ),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["comments_closed"], true);

        let (status, body) = add_comment(&app, &id, json!({"body": "too late"})).await;
        assert_eq!(status, 403);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn live_stream_requires_existing_post() {
        let app = app();
        let missing = colloquy_types::PostId::new();
        let (status, _) = send(&app, get(&format!("/v1/posts/{missing}/comments/live"))).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn live_stream_opens_as_event_stream() {
        let app = app();
        let id = create_post(&app).await;
        let response = app
            .clone()
            .oneshot(get(&format!("/v1/posts/{id}/comments/live")))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn live_stream_delivers_new_comment() {
        use futures::StreamExt;
        use std::time::Duration;

        let app = app();
        let id = create_post(&app).await;
        let response = app
            .clone()
            .oneshot(get(&format!("/v1/posts/{id}/comments/live")))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let mut frames = response.into_body().into_data_stream();

        let (status, created) = add_comment(&app, &id, json!({"body": "live one"})).await;
        assert_eq!(status, StatusCode::CREATED);

        let mut text = String::new();
        while !text.contains("\n\n") {
            let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .expect("no event within 2s")
                .expect("stream ended")
                .unwrap();
            text.push_str(&String::from_utf8_lossy(&frame));
        }

        assert!(text.contains("event: comment"));
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let comment: Value = serde_json::from_str(data).unwrap();
        assert_eq!(comment["body"], "live one");
        assert_eq!(comment["id"], created["id"]);
    }
}
