//! Websocket server carrying remote commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use playout_ipc::{PlaybackState, PlayerCommand};

use crate::auth::AuthToken;
use crate::error::ControlError;
use crate::protocol::{route, CloseReason, Disposition};
use crate::{ControlResult, SHUTDOWN_TIMEOUT_MS};

/// Receives commands from authenticated peers.
///
/// Implementations must return promptly; they run on the server's runtime.
pub trait CommandSink: Send + Sync + 'static {
    /// Apply a command and report the resulting state, or why it was refused.
    fn dispatch(&self, command: PlayerCommand) -> Result<PlaybackState, String>;
}

impl<F> CommandSink for F
where
    F: Fn(PlayerCommand) -> Result<PlaybackState, String> + Send + Sync + 'static,
{
    fn dispatch(&self, command: PlayerCommand) -> Result<PlaybackState, String> {
        self(command)
    }
}

#[derive(Clone)]
struct ServerState {
    token: AuthToken,
    sink: Arc<dyn CommandSink>,
}

/// Control channel listening on its own runtime.
pub struct ControlServer {
    local_addr: SocketAddr,
    runtime: Option<Runtime>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ControlServer {
    /// Bind `bind:port` and start accepting connections.
    #[instrument(name = "control_start", skip(token, sink))]
    pub fn start(
        bind: &str,
        port: u16,
        token: AuthToken,
        sink: Arc<dyn CommandSink>,
    ) -> ControlResult<Self> {
        let runtime = Runtime::new().map_err(ControlError::Runtime)?;

        let listener = runtime
            .block_on(TcpListener::bind((bind, port)))
            .map_err(|source| ControlError::Bind {
                addr: format!("{bind}:{port}"),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ControlError::Bind {
            addr: format!("{bind}:{port}"),
            source,
        })?;

        let app = Router::new()
            .fallback(upgrade)
            .with_state(ServerState { token, sink });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        runtime.spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
            if let Err(e) = served {
                error!("Control server failed: {}", e);
            }
        });

        info!(%local_addr, "Control channel listening");
        Ok(Self {
            local_addr,
            runtime: Some(runtime),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Stop listening and drop every connection.
    #[instrument(name = "control_stop", skip(self))]
    pub fn stop(&mut self) -> ControlResult<()> {
        let runtime = self.runtime.take().ok_or(ControlError::NotRunning)?;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        runtime.shutdown_timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS));
        info!("Control channel stopped");
        Ok(())
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, peer, state))
}

async fn serve_connection(mut socket: WebSocket, peer: SocketAddr, state: ServerState) {
    info!(%peer, "Control client connected");

    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                debug!(%peer, "Control connection error: {}", e);
                break;
            }
        };

        let disposition = match message {
            Message::Text(text) => route(text.as_str(), &state.token),
            Message::Binary(_) => Disposition::Close(CloseReason::InvalidPayload(
                "binary frames are not accepted".to_string(),
            )),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        match disposition {
            Disposition::Dispatch(command) => {
                let reply = reply_for(command, state.sink.dispatch(command));
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Disposition::Ignore(reason) => {
                warn!(%peer, %reason, "Ignoring control message");
            }
            Disposition::Close(reason) => {
                warn!(%peer, code = reason.code(), reason = reason.message(), "Closing control connection");
                let frame = CloseFrame {
                    code: reason.code(),
                    reason: reason.message().to_string().into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    info!(%peer, "Control client disconnected");
}

fn reply_for(command: PlayerCommand, outcome: Result<PlaybackState, String>) -> String {
    match outcome {
        Ok(state) => json!({
            "status": "ok",
            "command": command.name(),
            "state": state,
        }),
        Err(reason) => json!({
            "status": "rejected",
            "command": command.name(),
            "reason": reason,
        }),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    struct Recorder(Mutex<Vec<PlayerCommand>>);

    impl CommandSink for Recorder {
        fn dispatch(&self, command: PlayerCommand) -> Result<PlaybackState, String> {
            self.0.lock().unwrap().push(command);
            match command {
                PlayerCommand::Stop => Err("already stopping".to_string()),
                _ => Ok(PlaybackState::Playing),
            }
        }
    }

    fn start() -> (ControlServer, AuthToken, Arc<Recorder>) {
        let token = AuthToken::generate();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let server = ControlServer::start(
            "127.0.0.1",
            0,
            token.clone(),
            Arc::clone(&recorder) as Arc<dyn CommandSink>,
        )
        .unwrap();
        (server, token, recorder)
    }

    fn url(server: &ControlServer) -> String {
        format!("ws://{}/control", server.local_addr())
    }

    async fn next_text(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Value {
        match ws.next().await {
            Some(Ok(ClientMessage::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text reply, got {other:?}"),
        }
    }

    async fn close_code(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> u16 {
        match ws.next().await {
            Some(Ok(ClientMessage::Close(Some(frame)))) => u16::from(frame.code),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_shapes() {
        let ok: Value =
            serde_json::from_str(&reply_for(PlayerCommand::Reset, Ok(PlaybackState::SeekPending)))
                .unwrap();
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["command"], "reset");
        assert_eq!(ok["state"], "seek_pending");

        let rejected: Value =
            serde_json::from_str(&reply_for(PlayerCommand::Play, Err("stopped".to_string())))
                .unwrap();
        assert_eq!(rejected["status"], "rejected");
        assert_eq!(rejected["reason"], "stopped");
    }

    fn client() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn command(token: &AuthToken, name: &str) -> ClientMessage {
        ClientMessage::Text(format!(r#"{{"token":"{}","command":"{}"}}"#, token.as_str(), name).into())
    }

    #[test]
    fn test_commands_are_acknowledged() {
        let (server, token, recorder) = start();
        client().block_on(async {
            let (mut ws, _) = tokio_tungstenite::connect_async(url(&server)).await.unwrap();

            ws.send(command(&token, "play")).await.unwrap();
            let reply = next_text(&mut ws).await;
            assert_eq!(reply["status"], "ok");
            assert_eq!(reply["state"], "playing");

            // Ignored, so the next reply belongs to the stop below.
            ws.send(command(&token, "rewind")).await.unwrap();

            ws.send(command(&token, "stop")).await.unwrap();
            let reply = next_text(&mut ws).await;
            assert_eq!(reply["status"], "rejected");
            assert_eq!(reply["command"], "stop");
        });

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![PlayerCommand::Play, PlayerCommand::Stop]
        );
    }

    #[test]
    fn test_wrong_token_closes_with_policy_violation() {
        let (server, _token, recorder) = start();
        let code = client().block_on(async {
            let (mut ws, _) = tokio_tungstenite::connect_async(url(&server)).await.unwrap();
            ws.send(command(&AuthToken::generate(), "play")).await.unwrap();
            close_code(&mut ws).await
        });
        assert_eq!(code, 1008);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json_closes_with_invalid_payload() {
        let (server, _token, _recorder) = start();
        let code = client().block_on(async {
            let (mut ws, _) = tokio_tungstenite::connect_async(url(&server)).await.unwrap();
            ws.send(ClientMessage::Text("{oops".to_string().into()))
                .await
                .unwrap();
            close_code(&mut ws).await
        });
        assert_eq!(code, 1007);
    }

    #[test]
    fn test_binary_frame_closes_with_invalid_payload() {
        let (server, _token, _recorder) = start();
        let code = client().block_on(async {
            let (mut ws, _) = tokio_tungstenite::connect_async(url(&server)).await.unwrap();
            ws.send(ClientMessage::Binary(vec![1u8, 2, 3].into()))
                .await
                .unwrap();
            close_code(&mut ws).await
        });
        assert_eq!(code, 1007);
    }

    #[test]
    fn test_bind_failure_reported() {
        let (server, token, recorder) = start();
        let port = server.local_addr().port();
        let second = ControlServer::start("127.0.0.1", port, token, recorder);
        assert!(matches!(second, Err(ControlError::Bind { .. })));
    }

    #[test]
    fn test_stop_twice() {
        let (mut server, _token, _recorder) = start();
        assert!(server.is_running());
        server.stop().unwrap();
        assert!(matches!(server.stop(), Err(ControlError::NotRunning)));
    }
}
