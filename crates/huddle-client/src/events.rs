//! Real-time event listener.
//!
//! Keeps a WebSocket open to the server and forwards decoded
//! [`ServerEvent`]s. Dropped connections are retried with backoff; events
//! pushed while disconnected are lost, which is why every reconnect is
//! reported so the session can re-fetch.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use huddle_shared::constants::{WS_CLOSE_REPLACED, WS_CLOSE_UNAUTHORIZED};
use huddle_shared::ServerEvent;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket is (re)connected. `resumed` is true after a drop.
    Connected { resumed: bool },
    Event(ServerEvent),
    Disconnected,
    /// The server refused or replaced this connection; no retry follows.
    Closed { code: u16 },
}

/// Spawn the listener. It stops once the receiver is dropped or the server
/// closes the connection for good.
pub fn spawn_listener(ws_url: String) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(listen(ws_url, tx));
    (handle, rx)
}

async fn listen(ws_url: String, tx: mpsc::UnboundedSender<ConnectionEvent>) {
    let mut backoff = INITIAL_BACKOFF;
    let mut resumed = false;

    loop {
        match tokio_tungstenite::connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                backoff = INITIAL_BACKOFF;
                if tx.send(ConnectionEvent::Connected { resumed }).is_err() {
                    return;
                }
                resumed = true;

                let (_sink, mut source) = stream.split();
                let mut final_code = None;

                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match ServerEvent::from_json(&text) {
                            Ok(event) => {
                                if tx.send(ConnectionEvent::Event(event)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Undecodable server event"),
                        },
                        Ok(Message::Close(frame)) => {
                            final_code = frame
                                .filter(|f| is_final(f.code))
                                .map(|f| u16::from(f.code));
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "WebSocket receive error");
                            break;
                        }
                    }
                }

                if let Some(code) = final_code {
                    tracing::info!(code, "Server closed the event stream");
                    let _ = tx.send(ConnectionEvent::Closed { code });
                    return;
                }
                if tx.send(ConnectionEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?backoff, "WebSocket connect failed");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Close codes after which reconnecting would only repeat the refusal.
fn is_final(code: CloseCode) -> bool {
    matches!(u16::from(code), WS_CLOSE_UNAUTHORIZED | WS_CLOSE_REPLACED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::SinkExt;
    use huddle_shared::{DirectMessage, MessageId, UserId, UserSummary};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    fn direct_message() -> ServerEvent {
        ServerEvent::NewDirectMessage(DirectMessage {
            id: MessageId::new(),
            sender: UserSummary::anonymous(UserId::new()),
            receiver_id: UserId::new(),
            text: Some("hello again".into()),
            image: None,
            read: false,
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_reconnect_is_reported_as_resumed() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (handle, mut rx) = spawn_listener(format!("ws://{addr}/ws"));

        let (tcp, _) = server.accept().await.unwrap();
        let first = accept_async(tcp).await.unwrap();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected { resumed: false });
        drop(first);
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Disconnected);

        let (tcp, _) = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        let mut second = accept_async(tcp).await.unwrap();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected { resumed: true });

        let event = direct_message();
        second
            .send(Message::Text(event.to_json().unwrap()))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Event(event));

        handle.abort();
    }

    #[tokio::test]
    async fn test_unauthorized_close_stops_the_listener() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (handle, mut rx) = spawn_listener(format!("ws://{addr}/ws?token=bogus"));

        let (tcp, _) = server.accept().await.unwrap();
        let mut socket = accept_async(tcp).await.unwrap();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected { resumed: false });

        socket
            .close(Some(CloseFrame {
                code: CloseCode::from(WS_CLOSE_UNAUTHORIZED),
                reason: "Invalid session token".into(),
            }))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::Closed {
                code: WS_CLOSE_UNAUTHORIZED
            }
        );
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[test]
    fn test_refusals_are_final() {
        assert!(is_final(CloseCode::from(WS_CLOSE_UNAUTHORIZED)));
        assert!(is_final(CloseCode::from(WS_CLOSE_REPLACED)));
        assert!(!is_final(CloseCode::Away));
        assert!(!is_final(CloseCode::Normal));
    }
}
