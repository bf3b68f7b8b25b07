use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::api::errors::ApiError;
use crate::api::guards::{authenticate, bearer_token};
use crate::core::{
    security::Caller,
    state::AppState,
    time::{format_offset, now_utc},
};
use crate::services::fanout::{Channel, Envelope};
use crate::services::is_course_staff;

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub(crate) struct EventsQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "courseId")]
    course_id: Option<String>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/events/ws", get(events_ws))
}

/// Browsers cannot set headers on WebSocket upgrades, so the token may also
/// come as `?token=`.
async fn events_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;
    let caller = authenticate(&state, &token)?;
    let channels = channels_for(&state, &caller, query.course_id).await?;

    tracing::debug!(user_id = %caller.id, channels = channels.len(), "Event stream opened");
    Ok(ws.on_upgrade(move |socket| stream_events(socket, state, channels)))
}

/// Own student channel and global always; a course channel only for its
/// staff and enrolled students.
async fn channels_for(
    state: &AppState,
    caller: &Caller,
    course_id: Option<String>,
) -> Result<Vec<Channel>, ApiError> {
    let mut channels = vec![Channel::Student(caller.id.clone()), Channel::Global];

    if let Some(course_id) = course_id {
        let store = state.store();
        let staff = is_course_staff(store, &course_id, caller)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check course access"))?;
        let enrolled = staff
            || store
                .is_enrolled(&course_id, &caller.id)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to check enrollment"))?;
        if !enrolled {
            return Err(ApiError::Forbidden("Not a member of this course".to_string()));
        }
        channels.push(Channel::Course(course_id));
    }

    Ok(channels)
}

async fn stream_events(socket: WebSocket, state: AppState, channels: Vec<Channel>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(OUTBOUND_BUFFER);
    let names: Vec<String> = channels.iter().map(ToString::to_string).collect();

    let forwarders: Vec<_> = names
        .iter()
        .map(|name| {
            let mut receiver = state.hub().subscribe(name);
            let tx = tx.clone();
            let name = name.clone();
            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(envelope) => {
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %name, skipped, "Event subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        })
        .collect();
    drop(tx);

    let (mut sink, mut inbound) = socket.split();

    let hello = Envelope {
        event: "subscribed".to_string(),
        payload: json!({ "channels": names }),
        ts: format_offset(now_utc()),
    };

    let send_task = tokio::spawn(async move {
        if send_envelope(&mut sink, &hello).await.is_err() {
            return;
        }
        while let Some(envelope) = rx.recv().await {
            if send_envelope(&mut sink, &envelope).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are ignored; the loop only watches for the close.
    while let Some(Ok(message)) = inbound.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
    for forwarder in forwarders {
        forwarder.abort();
    }
}

async fn send_envelope(
    sink: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    match serde_json::to_string(envelope) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(err) => {
            tracing::warn!(event = %envelope.event, error = %err, "Dropping unencodable event");
            Ok(())
        }
    }
}
