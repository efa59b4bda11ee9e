use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    services::sse_events::EVENT_GAME_SNAPSHOT,
    state::SharedEngine,
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to the scoreboard stream.
pub fn subscribe(engine: &SharedEngine) -> broadcast::Receiver<ServerEvent> {
    engine.sse().subscribe()
}

/// First events sent to a fresh subscriber: a handshake and the current game.
pub async fn initial_events(engine: &SharedEngine) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(2);
    let handshake = Handshake {
        message: "scoreboard stream connected".into(),
        degraded: engine.is_degraded(),
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake) {
        Ok(event) => events.push(event),
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }
    match ServerEvent::json(
        Some(EVENT_GAME_SNAPSHOT.to_string()),
        &engine.snapshot().await,
    ) {
        Ok(event) => events.push(event),
        Err(err) => warn!(error = %err, "failed to serialize initial snapshot"),
    }
    events
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response. `initial` is sent
/// before any broadcast event.
pub fn to_sse_stream(
    initial: Vec<ServerEvent>,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE subscriber lagged behind");
                            continue;
                        }
                    }
                }
            }
        }

        info!("scoreboard SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
