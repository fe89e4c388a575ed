// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::session::SessionState;
use crate::core::handler::command_router::{RouteResponse, Router};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::replication::handler::{ReplicaHandler, SyncRequest};
use crate::core::state::{ClientRole, ServerState};
use crate::core::{CitrineError, Command};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// The next step for the connection's main loop to take.
enum NextAction {
    Continue,
    ExitLoop,
}

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler {
    framed: Option<Framed<TcpStream, RespFrameCodec>>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl ConnectionHandler {
    pub async fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let is_auth_required = state.config.lock().await.password.is_some();
        Self {
            framed: Some(Framed::new(socket, RespFrameCodec)),
            addr,
            state,
            session_id,
            shutdown_rx,
            global_shutdown_rx,
            session: SessionState::new(is_auth_required),
        }
    }

    /// The main event loop for the connection, handling incoming frames and signals.
    pub async fn run(&mut self) -> Result<(), CitrineError> {
        let mut guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        'main_loop: loop {
            if self.framed.is_none() {
                // Connection was handed off to the replication handler.
                break 'main_loop;
            }

            tokio::select! {
                biased; // Prioritize shutdown signals over traffic.
                _ = self.global_shutdown_rx.recv() => {
                    info!("Connection handler for {} received global shutdown signal.", self.addr);
                    if let Some(framed) = self.framed.as_mut() {
                        let shutdown_msg = RespFrame::Error("SHUTDOWN Server is shutting down".to_string());
                        let _ = framed.send(shutdown_msg).await;
                    }
                    break 'main_loop;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.addr);
                    break 'main_loop;
                }
                result = self.framed.as_mut().unwrap().next() => {
                    match result {
                        Some(Ok(frame)) => {
                            match self.process_frame(frame, &mut guard).await {
                                Ok(NextAction::Continue) => {
                                    self.update_client_last_activity().await;
                                }
                                Ok(NextAction::ExitLoop) => break 'main_loop,
                                Err(e) => self.send_error_to_client(e).await?,
                            }
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            break 'main_loop;
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            break 'main_loop;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses a RESP frame, routes it as a command, and sends the response.
    async fn process_frame(
        &mut self,
        frame: RespFrame,
        conn_guard: &mut ConnectionGuard,
    ) -> Result<NextAction, CitrineError> {
        let command = Command::try_from(frame)?;
        debug!(
            "Session {}: received command: {}",
            self.session_id,
            command.name()
        );

        // PSYNC and SYNC trigger a protocol switch and hand the socket off to
        // the replication handler. Authentication still applies first.
        match &command {
            Command::Psync(psync) if self.session.is_authenticated => {
                let request = SyncRequest::Psync {
                    replication_id: psync.replication_id.clone(),
                    offset: psync.offset.clone(),
                };
                return self.handle_replica_handoff(request, conn_guard);
            }
            Command::Sync(_) if self.session.is_authenticated => {
                return self.handle_replica_handoff(SyncRequest::Legacy, conn_guard);
            }
            _ => {}
        }

        let is_quit = matches!(command, Command::Quit(_));

        let mut router = Router::new(
            self.state.clone(),
            self.session_id,
            self.addr,
            &mut self.session,
        );
        let route_response = router.route(command).await?;
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| CitrineError::Internal("framed stream missing".into()))?;

        match route_response {
            RouteResponse::Single(response) => {
                framed.send(response.into()).await?;
            }
            RouteResponse::NoOp => {
                debug!("Session {}: no response to send.", self.session_id);
            }
        }

        if is_quit {
            Ok(NextAction::ExitLoop)
        } else {
            Ok(NextAction::Continue)
        }
    }

    /// Hands off the connection to a dedicated `ReplicaHandler`.
    fn handle_replica_handoff(
        &mut self,
        request: SyncRequest,
        conn_guard: &mut ConnectionGuard,
    ) -> Result<NextAction, CitrineError> {
        conn_guard.set_handed_off();

        let Some(framed) = self.framed.take() else {
            return Err(CitrineError::Internal(
                "Framed stream already taken for replica handoff".into(),
            ));
        };

        // Update the client info to reflect the new role.
        if let Some(entry) = self.state.clients.get(&self.session_id) {
            if let Ok(mut client_info) = entry.value().0.try_lock() {
                client_info.role = ClientRole::Replica;
            }
        }

        info!("Handing off connection {} to ReplicaHandler.", self.addr);
        let shutdown_rx_for_handler = self.shutdown_rx.resubscribe();
        let stream = framed.into_inner();

        let handler = ReplicaHandler::new(
            self.state.clone(),
            self.addr,
            self.session_id,
            stream,
        );
        tokio::spawn(handler.run(request, shutdown_rx_for_handler));
        Ok(NextAction::ExitLoop)
    }

    /// Sends an error frame back to the client.
    async fn send_error_to_client(&mut self, e: CitrineError) -> Result<(), CitrineError> {
        if let Some(framed) = self.framed.as_mut() {
            let error_frame = RespFrame::Error(format_wire_error(&e));
            debug!(
                "Session {}: sending error response: {:?}",
                self.session_id, error_frame
            );
            framed.send(error_frame).await?;
        }
        Ok(())
    }

    /// Updates the client's last activity time for monitoring.
    async fn update_client_last_activity(&self) {
        if let Some(entry) = self.state.clients.get(&self.session_id) {
            entry.value().0.lock().await.last_command_time = Instant::now();
        }
    }
}

/// Errors already carrying a wire-level code (NOAUTH, READONLY, ...) go out
/// verbatim; everything else gets the generic ERR prefix.
fn format_wire_error(e: &CitrineError) -> String {
    let text = e.to_string();
    let has_code = text
        .split_whitespace()
        .next()
        .is_some_and(|first| !first.is_empty() && first.chars().all(|c| c.is_ascii_uppercase()));
    if has_code {
        text
    } else {
        format!("ERR {text}")
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &CitrineError) -> bool {
    matches!(e, CitrineError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
