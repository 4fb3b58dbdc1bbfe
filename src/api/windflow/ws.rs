use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::StreamConfig;
use crate::dashboard::{ConnectionState, Dashboard};
use crate::error::WindflowError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum PumpExit {
    Shutdown,
    Dropped,
}

/// Feeds push-channel frames into a [`Dashboard`].
pub struct StreamClient {
    config: StreamConfig,
    dashboard: Dashboard,
}

impl StreamClient {
    pub fn new(config: StreamConfig, dashboard: Dashboard) -> Self {
        Self { config, dashboard }
    }

    /// Opens the transport and spawns the session task. Failing to open is
    /// reported here and never retried.
    pub async fn connect(self) -> Result<StreamSession, WindflowError> {
        let StreamClient { config, dashboard } = self;
        dashboard.set_connection_state(ConnectionState::Connecting);
        info!("Connecting to Windflow WebSocket: {}", config.url);

        let ws_stream = match connect_async(&config.url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!("Connection error: {}", e);
                dashboard.set_connection_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        info!("Successfully connected to WebSocket");
        dashboard.set_connection_state(ConnectionState::Connected);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            ws_stream,
            config,
            dashboard.clone(),
            shutdown_rx,
        ));

        Ok(StreamSession {
            shutdown: Some(shutdown_tx),
            task: Some(task),
            dashboard,
        })
    }
}

async fn run_session(
    mut ws_stream: WsStream,
    config: StreamConfig,
    dashboard: Dashboard,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        if let PumpExit::Shutdown = pump(&mut ws_stream, &dashboard, &mut shutdown).await {
            dashboard.set_connection_state(ConnectionState::Closed);
            return;
        }

        match reconnect(&config, &dashboard, &mut shutdown).await {
            Some(stream) => ws_stream = stream,
            None => return,
        }
    }
}

async fn pump(
    ws_stream: &mut WsStream,
    dashboard: &Dashboard,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                if let Err(e) = ws_stream.close(None).await {
                    debug!("Close handshake failed: {}", e);
                }
                info!("WebSocket connection closed by client");
                return PumpExit::Shutdown;
            }
            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let report = dashboard.handle_message(&text);
                    debug!("Dispatched frame: {:?}", report);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        dashboard.handle_message(&text);
                    }
                    Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket connection closed: {:?}", frame);
                    return PumpExit::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return PumpExit::Dropped;
                }
                None => {
                    info!("WebSocket stream ended");
                    return PumpExit::Dropped;
                }
            }
        }
    }
}

/// Retries per the configured policy. `None` means the session is over and
/// the final state has been recorded.
async fn reconnect(
    config: &StreamConfig,
    dashboard: &Dashboard,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<WsStream> {
    let mut attempt = 0;
    loop {
        let Some(delay) = config.reconnect.delay(attempt) else {
            if attempt > 0 {
                warn!("Giving up on {} after {} attempt(s)", config.url, attempt);
            }
            dashboard.set_connection_state(ConnectionState::Disconnected);
            return None;
        };
        attempt += 1;
        dashboard.set_connection_state(ConnectionState::Reconnecting { attempt });
        info!("Reconnecting in {:?} (attempt {})", delay, attempt);

        let connected = tokio::select! {
            _ = &mut *shutdown => {
                dashboard.set_connection_state(ConnectionState::Closed);
                return None;
            }
            result = async {
                tokio::time::sleep(delay).await;
                connect_async(&config.url).await
            } => result,
        };

        match connected {
            Ok((ws_stream, _)) => {
                info!("Reconnected to {}", config.url);
                dashboard.set_connection_state(ConnectionState::Connected);
                return Some(ws_stream);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
}

/// A live push-channel session. The transport is released exactly once,
/// by [`close`](Self::close) or on drop.
pub struct StreamSession {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    dashboard: Dashboard,
}

impl StreamSession {
    pub fn state(&self) -> ConnectionState {
        self.dashboard.connection_state()
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    /// Resolves once the session task has finished, whether the transport
    /// dropped or the session was closed.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                error!("Stream task failed: {}", e);
            }
            self.task = None;
        }
    }

    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // Err means the task already exited
            let _ = shutdown.send(());
        }
        self.closed().await;
        self.dashboard.set_connection_state(ConnectionState::Closed);
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
