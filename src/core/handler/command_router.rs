// src/core/handler/command_router.rs

//! The central component for routing parsed commands to their appropriate handlers.
//!
//! The `Router` orchestrates command processing: authentication, the
//! read-only-replica gate, the min-replicas write policy, execution, and
//! finally propagation of write effects onto the event bus. Propagation-time
//! rewrites live here too, because this is the last point with access to both
//! the executed command and the session that issued it:
//!
//! - relative expirations become absolute (`EXPIRE` → `PEXPIREAT`,
//!   `SET ... EX/PX` → `SET ... PXAT`), so every copy of the dataset applies
//!   the same deadline;
//! - `EVALSHA` is shipped verbatim only when the digest is known to be held
//!   by every replica, and otherwise rewritten to a body-carrying `EVAL`.

use crate::connection::SessionState;
use crate::core::commands::command_trait::{CommandFlags, WriteOutcome};
use crate::core::commands::generic::{Eval, PExpireAt, ReplicaOf, Replconf, ScriptSubcommand};
use crate::core::commands::string::SetExpiry;
use crate::core::commands::ExecutionContext;
use crate::core::events::PropagatedWork;
use crate::core::replication::roles;
use crate::core::scripting::ScriptRegistry;
use crate::core::state::ServerState;
use crate::core::{CitrineError, Command, RespValue};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error};

/// Represents the response a routed command produces.
pub enum RouteResponse {
    /// A single RESP value. This is the most common response type.
    Single(RespValue),
    /// No response should be sent to the client (e.g., `REPLCONF ACK`).
    NoOp,
}

/// The `Router` receives a parsed `Command` and directs it through the
/// processing pipeline.
pub struct Router<'a> {
    state: Arc<ServerState>,
    session_id: u64,
    addr: SocketAddr,
    session: &'a mut SessionState,
}

impl<'a> Router<'a> {
    pub fn new(
        state: Arc<ServerState>,
        session_id: u64,
        addr: SocketAddr,
        session: &'a mut SessionState,
    ) -> Self {
        Self {
            state,
            session_id,
            addr,
            session,
        }
    }

    /// The main entry point for routing a command.
    pub async fn route(&mut self, command: Command) -> Result<RouteResponse, CitrineError> {
        self.state.stats.increment_total_commands();
        debug!(
            "Session {}: routing command '{}'",
            self.session_id,
            command.name()
        );

        if !self.session.is_authenticated {
            return match command {
                Command::Auth(auth) => self.handle_auth(auth.password).await,
                _ => Err(CitrineError::AuthRequired),
            };
        }

        match command {
            // Connection state commands (modify session state directly).
            Command::Auth(auth) => self.handle_auth(auth.password).await,
            Command::Quit(_) => Ok(RouteResponse::Single(RespValue::SimpleString("OK".into()))),
            Command::Select(select) => self.handle_select(select.db_index).await,

            // Replication control handled at the router level.
            Command::Replconf(replconf) => self.handle_replconf(replconf).await,
            Command::ReplicaOf(replicaof) => self.handle_replicaof(replicaof).await,
            Command::Psync(_) | Command::Sync(_) => Err(CitrineError::ReplicationError(
                "PSYNC/SYNC should be handled by the connection handler".into(),
            )),

            // All other commands go through the generic execution path.
            command => self.execute_command(command).await,
        }
    }

    async fn handle_auth(&mut self, password: String) -> Result<RouteResponse, CitrineError> {
        let expected = self.state.config.lock().await.password.clone();
        match expected {
            None => Err(CitrineError::InvalidState(
                "Client sent AUTH, but no password is set".to_string(),
            )),
            Some(expected) if expected == password => {
                self.session.is_authenticated = true;
                Ok(RouteResponse::Single(RespValue::SimpleString("OK".into())))
            }
            Some(_) => Err(CitrineError::InvalidPassword),
        }
    }

    async fn handle_select(&mut self, db_index: usize) -> Result<RouteResponse, CitrineError> {
        let databases = self.state.config.lock().await.databases;
        if db_index >= databases {
            return Err(CitrineError::InvalidState(
                "DB index is out of range".to_string(),
            ));
        }
        self.session.current_db_index = db_index;
        Ok(RouteResponse::Single(RespValue::SimpleString("OK".into())))
    }

    /// Pre-handoff REPLCONF traffic from a connecting replica.
    async fn handle_replconf(&mut self, replconf: Replconf) -> Result<RouteResponse, CitrineError> {
        if let Some(port) = replconf.listening_port() {
            self.state
                .replication
                .announced_ports
                .insert(self.addr, port);
            return Ok(RouteResponse::Single(RespValue::SimpleString("OK".into())));
        }
        if replconf.ack_offset().is_some() {
            // Acks carry no reply.
            return Ok(RouteResponse::NoOp);
        }
        // Remaining subcommands (capabilities and the like) are advisory.
        Ok(RouteResponse::Single(RespValue::SimpleString("OK".into())))
    }

    async fn handle_replicaof(
        &mut self,
        replicaof: ReplicaOf,
    ) -> Result<RouteResponse, CitrineError> {
        match replicaof.target {
            Some((host, port)) => roles::become_replica_of(&self.state, host, port).await?,
            None => roles::become_standalone(&self.state).await?,
        }
        Ok(RouteResponse::Single(RespValue::SimpleString("OK".into())))
    }

    /// Executes a standard command, handles propagation, and returns the response.
    async fn execute_command(&mut self, command: Command) -> Result<RouteResponse, CitrineError> {
        let flags = command.get_flags();
        let mutates = flags.contains(CommandFlags::WRITE) || flags.contains(CommandFlags::SCRIPTING);

        if flags.contains(CommandFlags::WRITE) {
            if self.state.config.lock().await.replication.is_replica() {
                return Err(CitrineError::ReadOnly(
                    "You can't write against a read only replica.".to_string(),
                ));
            }
            self.state
                .replication
                .check_min_replicas_policy(&self.state)
                .await?;
        }

        // Resolve relative expirations once, before execution, so the local
        // dataset and every downstream copy share the deadline.
        let command = normalize_expirations(command);

        let db = self
            .state
            .get_db(self.session.current_db_index)
            .ok_or_else(|| CitrineError::Internal("selected database vanished".into()))?;

        // Mutating commands hold the propagation lock across execute+publish,
        // making the pair atomic relative to snapshot cuts.
        let propagating = if mutates {
            Some(self.state.write_pause.read().await)
        } else {
            None
        };

        let mut ctx = ExecutionContext {
            state: self.state.clone(),
            db: &db,
            db_index: self.session.current_db_index,
            session_id: self.session_id,
        };
        let (value, outcome) = command.execute(&mut ctx).await?;

        if outcome != WriteOutcome::DidNotWrite {
            match outcome {
                WriteOutcome::Write { keys_modified } => {
                    self.state.persistence.increment_dirty_keys(keys_modified)
                }
                WriteOutcome::Delete { keys_deleted } => {
                    self.state.persistence.increment_dirty_keys(keys_deleted)
                }
                WriteOutcome::Flush => self
                    .state
                    .persistence
                    .dirty_keys_counter
                    .store(0, Ordering::Relaxed),
                WriteOutcome::DidNotWrite => {}
            }

            if !flags.contains(CommandFlags::NO_PROPAGATE)
                && let Some(work_command) = self.rewrite_for_propagation(command).await
            {
                self.state.event_bus.publish(PropagatedWork {
                    db_index: self.session.current_db_index,
                    command: work_command,
                });
            }
        }
        drop(propagating);

        Ok(RouteResponse::Single(value))
    }

    /// Applies the script-cache policy to the outgoing command. Returns
    /// `None` when the command cannot be propagated safely.
    async fn rewrite_for_propagation(&self, command: Command) -> Option<Command> {
        match command {
            Command::EvalSha(evalsha) => {
                if self
                    .state
                    .replicated_scripts
                    .contains(&evalsha.sha1)
                    .await
                {
                    return Some(Command::EvalSha(evalsha));
                }
                match self.state.scripting.get(&evalsha.sha1) {
                    Some(body) => {
                        // Ship the body once; subsequent calls may use the
                        // short form.
                        self.state.replicated_scripts.insert(&evalsha.sha1).await;
                        Some(Command::Eval(Eval {
                            script: body,
                            num_keys: evalsha.num_keys,
                            keys: evalsha.keys,
                            args: evalsha.args,
                        }))
                    }
                    None => {
                        // The script executed but was flushed before
                        // propagation. Replicas cannot follow; force them
                        // through a resync instead of diverging silently.
                        error!(
                            "Script for executed EVALSHA '{}' vanished before propagation. \
                             Disconnecting replicas to force a resync.",
                            evalsha.sha1
                        );
                        self.state.disconnect_all_replicas();
                        None
                    }
                }
            }
            Command::Script(script) => {
                if let ScriptSubcommand::Load(body) = &script.subcommand {
                    let digest = ScriptRegistry::digest(body);
                    self.state.replicated_scripts.insert(&digest).await;
                }
                Some(Command::Script(script))
            }
            other => Some(other),
        }
    }
}

/// Rewrites relative expirations into their absolute form.
fn normalize_expirations(command: Command) -> Command {
    match command {
        Command::Expire(expire) => {
            let at_ms = expire.deadline_ms();
            Command::PExpireAt(PExpireAt {
                key: expire.key,
                at_ms,
            })
        }
        Command::Set(set)
            if matches!(set.expiry, Some(SetExpiry::Ex(_)) | Some(SetExpiry::Px(_))) =>
        {
            let at_ms = set
                .expiry
                .map(|expiry| expiry.absolute_ms())
                .unwrap_or_default();
            Command::Set(crate::core::commands::string::Set {
                expiry: Some(SetExpiry::Pxat(at_ms)),
                ..set
            })
        }
        other => other,
    }
}
