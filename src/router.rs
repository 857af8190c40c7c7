//! Turns decoded requests into responses: command lookup, handler
//! invocation, and the command-executed notification behind it.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::commands::{CommandError, CommandKind, CommandRegistry};
use crate::notification::{CommandExecuted, NotificationBus};
use crate::resp::RespValue;

/// The result of executing one request: the frames to write back, and
/// the notification to publish once they are on the wire.
///
/// Publication is deliberately a second step. Subscribers may write more
/// bytes on the same connection (the snapshot after PSYNC), and those
/// must land after the response itself.
pub struct DispatchOutcome {
    pub response: Vec<RespValue>,
    notification: Option<CommandExecuted>,
}

pub struct Router {
    registry: Arc<CommandRegistry>,
    bus: Arc<NotificationBus>,
}

impl Router {
    pub fn new(registry: Arc<CommandRegistry>, bus: Arc<NotificationBus>) -> Self {
        Self { registry, bus }
    }

    /// Executes one decoded request.
    ///
    /// Every request that names a command, known or not, successful or
    /// not, carries a `CommandExecuted` notification in its outcome; a
    /// frame that is not even a command array only gets an error
    /// response.
    pub async fn execute(&self, frame: RespValue, request_id: Uuid) -> DispatchOutcome {
        let (name, args) = match extract_command(&frame) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(request = %request_id, error = %e, "request is not a command array");
                return DispatchOutcome {
                    response: vec![e.as_frame()],
                    notification: None,
                };
            }
        };

        let kind = CommandKind::resolve(&name, &args);

        let (response, success) = match kind {
            Some(kind) => match self.registry.execute(kind, &args).await {
                Ok(frames) => (frames, true),
                Err(e) => {
                    debug!(request = %request_id, command = kind.as_str(), error = %e, "command failed");
                    (vec![e.as_frame()], false)
                }
            },
            None => {
                debug!(request = %request_id, command = %name, "unknown command");
                (
                    vec![CommandError::UnknownCommand(name.clone()).as_frame()],
                    false,
                )
            }
        };

        let cmd = kind
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| name.clone());

        DispatchOutcome {
            notification: Some(CommandExecuted {
                cmd,
                request_id,
                request: frame,
                args,
                response: response.clone(),
                success,
            }),
            response,
        }
    }

    /// Publishes the outcome's notification. Call after the response has
    /// been written (or deliberately suppressed).
    pub async fn publish(&self, outcome: DispatchOutcome) {
        if let Some(notification) = outcome.notification {
            self.bus.publish_command_executed(notification).await;
        }
    }
}

/// A request must be a top-level array whose first element is a bulk
/// string naming the command; the rest are its arguments.
fn extract_command(frame: &RespValue) -> Result<(String, Vec<String>), CommandError> {
    let RespValue::Array(elements) = frame else {
        return Err(CommandError::InvalidCommand);
    };

    let name = match elements.first() {
        Some(RespValue::BulkString(name)) => name.to_uppercase(),
        _ => return Err(CommandError::InvalidCommand),
    };

    let mut args = Vec::with_capacity(elements.len().saturating_sub(1));

    for element in &elements[1..] {
        match element {
            RespValue::BulkString(arg) => args.push(arg.clone()),
            _ => return Err(CommandError::InvalidCommand),
        }
    }

    Ok((name, args))
}
