use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::error::ChatError;
use crate::messages::{ErrorResponse, ListMessagesQuery, SendMessageRequest, SendMessageResponse};
use crate::server::Server;

const MAX_BODY_BYTES: u64 = 16 * 1024;

type ApiReply = WithStatus<Json>;

fn ok<T: Serialize>(body: &T) -> ApiReply {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK)
}

fn error_reply(e: &ChatError) -> ApiReply {
    let status = match e {
        ChatError::UnknownRoom(_) => StatusCode::NOT_FOUND,
        ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ChatError::DuplicateMessage(_) => StatusCode::CONFLICT,
    };
    error_body(e.to_string(), status)
}

fn error_body(message: String, status: StatusCode) -> ApiReply {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse { error: message }),
        status,
    )
}

fn respond<T: Serialize>(result: Result<T, ChatError>) -> ApiReply {
    match result {
        Ok(body) => ok(&body),
        Err(e) => error_reply(&e),
    }
}

async fn list_rooms(server: Arc<Server>) -> Result<ApiReply, Infallible> {
    Ok(ok(&server.list_rooms()))
}

async fn list_messages(
    room_id: String,
    query: ListMessagesQuery,
    server: Arc<Server>,
) -> Result<ApiReply, Infallible> {
    let limit = server.page_size(query.limit);
    let before = query.before.as_deref().filter(|id| !id.is_empty());
    Ok(respond(server.list_messages(&room_id, limit, before).await))
}

async fn send_message(
    room_id: String,
    request: SendMessageRequest,
    server: Arc<Server>,
) -> Result<ApiReply, Infallible> {
    let result = server
        .send_message(&room_id, &request.sender, &request.content)
        .await
        .map(|message| SendMessageResponse { message });
    Ok(respond(result))
}

async fn room_status(room_id: String, server: Arc<Server>) -> Result<ApiReply, Infallible> {
    Ok(respond(server.status(&room_id).await))
}

/// Turns rejections raised while decoding a request into JSON errors.
/// Anything else, not-found included, is passed on so later filters can
/// still match.
async fn handle_rejection(err: Rejection) -> Result<ApiReply, Rejection> {
    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        return Ok(error_body(e.to_string(), StatusCode::BAD_REQUEST));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(error_body(e.to_string(), StatusCode::BAD_REQUEST));
    }
    if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        return Ok(error_body(e.to_string(), StatusCode::PAYLOAD_TOO_LARGE));
    }
    if let Some(e) = err.find::<warp::reject::UnsupportedMediaType>() {
        return Ok(error_body(
            e.to_string(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ));
    }
    Err(err)
}

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_server = warp::any().map(move || Arc::clone(&server));

    let rooms = warp::path!("api" / "rooms")
        .and(warp::get())
        .and(with_server.clone())
        .and_then(list_rooms);

    let list = warp::path!("api" / "rooms" / String / "messages")
        .and(warp::get())
        .and(warp::query::<ListMessagesQuery>())
        .and(with_server.clone())
        .and_then(list_messages);

    let send = warp::path!("api" / "rooms" / String / "messages")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_server.clone())
        .and_then(send_message);

    let status = warp::path!("api" / "rooms" / String / "status")
        .and(warp::get())
        .and(with_server)
        .and_then(room_status);

    let health = warp::path!("api" / "health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    rooms
        .or(list)
        .or(send)
        .or(status)
        .or(health)
        .recover(handle_rejection)
}
