use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::turn_processor::{TurnOutcome, TurnProcessor};
use crate::models::Frame;

/// A turn running on its own task. The reply buffer lives inside that task.
struct InFlightTurn {
    handle: JoinHandle<TurnOutcome>,
    cancel: CancellationToken,
}

/// Per-connection state: the conversation the connection is bound to and the
/// single-turn guard.
#[derive(Default)]
pub struct ConnectionContext {
    chat_id: Option<String>,
    in_flight: Option<InFlightTurn>,
}

impl ConnectionContext {
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }
}

/// Waits for the in-flight turn, or forever when there is none.
async fn join_in_flight(slot: &mut Option<InFlightTurn>) -> Result<TurnOutcome, JoinError> {
    match slot {
        Some(turn) => (&mut turn.handle).await,
        None => std::future::pending().await,
    }
}

/// Drives the turn protocol for every connection, one turn at a time per connection.
#[derive(Clone)]
pub struct ConnectionManager {
    processor: Arc<TurnProcessor>,
}

impl ConnectionManager {
    pub fn new(processor: Arc<TurnProcessor>) -> Self {
        Self { processor }
    }

    /// Serves one connection until `inbound` ends or the transport goes away.
    ///
    /// Messages that arrive while a turn is running are answered with `[BUSY]`.
    /// The guard is released before the handshake is sent, so a client may submit
    /// its next turn as soon as it sees the handshake.
    pub async fn serve_connection<S>(&self, inbound: S, outbound: mpsc::Sender<Frame>)
    where
        S: Stream<Item = Vec<u8>>,
    {
        let connection_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("connection", %connection_id);
        async {
            info!("client connected");
            let mut inbound = std::pin::pin!(inbound);
            let mut ctx = ConnectionContext::default();

            loop {
                tokio::select! {
                    biased;
                    joined = join_in_flight(&mut ctx.in_flight) => {
                        ctx.in_flight = None;
                        let frame = match joined {
                            Ok(TurnOutcome::Completed { chat_id }) => {
                                ctx.chat_id = Some(chat_id.clone());
                                Some(Frame::Handshake { chat_id })
                            }
                            Ok(TurnOutcome::Failed) | Ok(TurnOutcome::Aborted) => None,
                            Err(e) => {
                                error!("turn task failed: {e}");
                                Some(Frame::Error)
                            }
                        };
                        if let Some(frame) = frame {
                            if outbound.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    message = inbound.next() => {
                        let Some(raw) = message else { break };
                        if ctx.is_busy() {
                            warn!("turn already in flight; rejecting message");
                            if outbound.send(Frame::Busy).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        ctx.in_flight =
                            Some(self.spawn_turn(raw, ctx.chat_id.clone(), outbound.clone()));
                    }
                }
            }

            if let Some(turn) = ctx.in_flight.take() {
                turn.cancel.cancel();
                debug!("cancelled in-flight turn");
            }
            info!(chat_id = ?ctx.chat_id(), "client disconnected");
        }
        .instrument(span)
        .await
    }

    fn spawn_turn(
        &self,
        raw: Vec<u8>,
        chat_id: Option<String>,
        outbound: mpsc::Sender<Frame>,
    ) -> InFlightTurn {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let processor = Arc::clone(&self.processor);
        let handle = tokio::spawn(
            async move { processor.run(&raw, chat_id.as_deref(), &outbound, &token).await }
                .in_current_span(),
        );
        InFlightTurn { handle, cancel }
    }
}
