use std::convert::Infallible;
use std::str::FromStr;

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use colloquy_service::{Comment, CommentId, CommentPage, NewComment, NewPost, PostId, PostView};
use colloquy_types::TypeError;

use crate::error::ApiError;
use crate::router::AppState;

/// Header carrying the caller's display name.
pub const USER_HEADER: &str = "x-user";

type ApiResult<T> = Result<T, ApiError>;

fn parse_id<T>(raw: &str) -> ApiResult<T>
where
    T: FromStr<Err = TypeError>,
{
    raw.parse().map_err(|e: TypeError| ApiError::bad_request(e.to_string()))
}

/// The body's author if given, else the `X-User` header. Blank ends up as
/// the anonymous author further down.
fn resolve_author(from_body: Option<String>, headers: &HeaderMap) -> String {
    from_body
        .filter(|a| !a.trim().is_empty())
        .or_else(|| {
            headers
                .get(USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// JSON body extractor whose rejections (bad syntax, missing fields, wrong
/// content type) come back as `BAD_REQUEST` in the usual error body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "colloquy",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store_kind,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub comments_closed: bool,
}

pub async fn list_posts(State(state): State<AppState>) -> ApiResult<Json<Vec<PostView>>> {
    let scope = state.discussion.begin_operation();
    let posts = state.discussion.list_posts(&scope).await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<PostView>)> {
    let input = NewPost {
        title: req.title,
        body: req.body,
        author: resolve_author(req.author, &headers),
        comments_closed: req.comments_closed,
    };
    let view = state.discussion.create_post(input).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PostView>> {
    let id: PostId = parse_id(&id)?;
    let scope = state.discussion.begin_operation();
    Ok(Json(state.discussion.get_post(&scope, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommentsClosedRequest {
    pub closed: bool,
}

pub async fn set_comments_closed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CommentsClosedRequest>,
) -> ApiResult<Json<PostView>> {
    let id: PostId = parse_id(&id)?;
    let scope = state.discussion.begin_operation();
    let view = state
        .discussion
        .set_comments_closed(&scope, id, req.closed)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentsQuery {
    pub after: Option<String>,
    pub limit: Option<i64>,
    pub parent: Option<String>,
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CommentsQuery>,
) -> ApiResult<Json<CommentPage>> {
    let post_id: PostId = parse_id(&id)?;
    let parent_id = query
        .parent
        .as_deref()
        .map(parse_id::<CommentId>)
        .transpose()?;
    let page = state
        .discussion
        .comments(post_id, parent_id, query.after.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let post_id: PostId = parse_id(&id)?;
    let parent_id = req
        .parent_id
        .as_deref()
        .map(parse_id::<CommentId>)
        .transpose()?;
    let input = NewComment {
        post_id,
        parent_id,
        author: resolve_author(req.author, &headers),
        body: req.body,
    };
    let comment = state.discussion.add_comment(input).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Comment>> {
    let id: CommentId = parse_id(&id)?;
    Ok(Json(state.discussion.get_comment(id).await?))
}

/// Server-sent events: one `comment` event per comment added to the post
/// while the stream is open. The stream ends when the server shuts down.
pub async fn live_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let post_id: PostId = parse_id(&id)?;
    let (rx, subscription) = state
        .discussion
        .subscribe_comments(post_id, state.live_capacity)
        .await?;
    debug!(%post_id, "live stream opened");

    // The subscription rides along in the stream state so the handler is
    // deregistered when the client goes away.
    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let comment = rx.recv().await?;
        let event = Event::default()
            .event("comment")
            .id(comment.id.to_string())
            .json_data(&comment)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok::<_, Infallible>(event), (rx, subscription)))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
