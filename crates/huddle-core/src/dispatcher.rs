use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::EngineEvent;
use crate::state::DisconnectReason;

/// An engine event tagged with the connect attempt it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomNotification {
    pub session_id: u64,
    pub event: EngineEvent,
}

/// Drains one engine session's event stream into the controller mailbox.
///
/// A single task forwards events one at a time, so the controller sees them
/// in production order and never two at once. Disconnect reasons are passed
/// through as-is, user-initiated included. If the engine drops its stream
/// without saying why, an `Unknown` disconnect is synthesized.
pub struct RoomEventDispatcher {
    handle: JoinHandle<()>,
}

impl RoomEventDispatcher {
    pub fn spawn<T>(
        session_id: u64,
        mut events: mpsc::Receiver<EngineEvent>,
        sink: mpsc::Sender<T>,
    ) -> Self
    where
        T: From<RoomNotification> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tracing::debug!("dispatcher started for session {session_id}");
            loop {
                let event = match events.recv().await {
                    Some(event) => event,
                    None => {
                        tracing::warn!("engine event stream closed without disconnect");
                        EngineEvent::Disconnected {
                            reason: DisconnectReason::Unknown,
                        }
                    }
                };
                let is_terminal = matches!(event, EngineEvent::Disconnected { .. });
                if let EngineEvent::Disconnected { reason } = &event {
                    tracing::info!("engine reported disconnect: {reason:?}");
                }

                let notification = RoomNotification { session_id, event };
                if sink.send(notification.into()).await.is_err() {
                    tracing::debug!("controller gone, dispatcher stopping");
                    break;
                }
                if is_terminal {
                    break;
                }
            }
            tracing::debug!("dispatcher ended for session {session_id}");
        });
        Self { handle }
    }
}

impl Drop for RoomEventDispatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left(sid: &str) -> EngineEvent {
        EngineEvent::ParticipantLeft {
            participant_sid: sid.to_string(),
        }
    }

    #[tokio::test]
    async fn forwards_in_production_order() {
        let (engine_tx, engine_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel::<RoomNotification>(8);
        let _dispatcher = RoomEventDispatcher::spawn(7, engine_rx, sink_tx);

        for sid in ["a", "b", "c"] {
            engine_tx.send(left(sid)).await.unwrap();
        }

        for sid in ["a", "b", "c"] {
            let n = sink_rx.recv().await.unwrap();
            assert_eq!(n.session_id, 7);
            assert_eq!(n.event, left(sid));
        }
    }

    #[tokio::test]
    async fn user_initiated_disconnect_is_forwarded_and_ends_stream() {
        let (engine_tx, engine_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel::<RoomNotification>(8);
        let _dispatcher = RoomEventDispatcher::spawn(1, engine_rx, sink_tx);

        let disconnect = EngineEvent::Disconnected {
            reason: DisconnectReason::UserInitiated,
        };
        engine_tx.send(disconnect.clone()).await.unwrap();
        engine_tx.send(left("late")).await.unwrap();

        assert_eq!(sink_rx.recv().await.unwrap().event, disconnect);
        assert!(sink_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_dispatcher_stops_forwarding() {
        let (engine_tx, engine_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel::<RoomNotification>(8);
        let dispatcher = RoomEventDispatcher::spawn(5, engine_rx, sink_tx);

        drop(dispatcher);
        let _ = engine_tx.send(left("after-drop")).await;

        assert!(sink_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_stream_becomes_unknown_disconnect() {
        let (engine_tx, engine_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel::<RoomNotification>(8);
        let _dispatcher = RoomEventDispatcher::spawn(3, engine_rx, sink_tx);
        drop(engine_tx);

        let n = sink_rx.recv().await.unwrap();
        assert_eq!(
            n.event,
            EngineEvent::Disconnected {
                reason: DisconnectReason::Unknown
            }
        );
    }
}
