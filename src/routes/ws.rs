use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{auth::Authorized, models::PipelineEvent, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Follow a single batch; the socket closes once it finishes or aborts.
    pub batch_id: Option<String>,
}

/// GET /ws?batch_id=
///
/// Streams pipeline events as JSON text frames. Without `batch_id` every
/// batch is streamed until the client disconnects.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    _auth: Authorized,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> Response {
    let rx = state.events.subscribe();
    let batch_id = q.batch_id.filter(|id| !id.is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, rx, batch_id))
}

#[derive(Debug, PartialEq, Eq)]
enum Forward {
    Skip,
    Send,
    /// Last event of the followed batch.
    SendAndClose,
}

fn forward(event: &PipelineEvent, batch_id: Option<&str>) -> Forward {
    match batch_id {
        None => Forward::Send,
        Some(id) if event.batch_id() != id => Forward::Skip,
        Some(_) if event.is_terminal() => Forward::SendAndClose,
        Some(_) => Forward::Send,
    }
}

async fn handle_socket(
    socket: WebSocket,
    mut rx: broadcast::Receiver<PipelineEvent>,
    batch_id: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WS subscriber lagged by {n} events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let action = forward(&event, batch_id.as_deref());
            if action == Forward::Skip {
                continue;
            }
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("WS serialise error: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            if action == Forward::SendAndClose {
                info!("Batch {} done, closing its WS subscription", event.batch_id());
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // Clients only listen; anything they send is ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(m) => debug!("WS recv (ignored): {m:?}"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
