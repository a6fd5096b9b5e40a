//! Control channel: request/reply over a closed-set, typed dispatch table
//! (spec.md §4.3, §6, and design note §9 "dynamic dispatch → typed dispatch
//! table"). Adding a command means adding a table entry, nothing more.
//!
//! The actual wire transport (sockets, pipes, whatever carries bytes between
//! processes) is an external collaborator's concern (spec.md §1); this
//! module only implements the in-process request/reply semantics, modeled
//! the way the teacher's `messages.rs` models `DaqCommand` + `oneshot` reply
//! channels.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct ControlRequest {
    pub command: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlReply {
    pub success: bool,
    pub error: Option<String>,
    pub data: Value,
}

impl ControlReply {
    pub fn ok(data: Value) -> Self {
        ControlReply {
            success: true,
            error: None,
            data,
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(Value::Object(Default::default()))
    }

    pub fn err(message: impl Into<String>) -> Self {
        ControlReply {
            success: false,
            error: Some(message.into()),
            data: Value::Null,
        }
    }

    /// A `PreconditionViolated`-shaped error reply carrying `reason` and
    /// `action`, per spec.md §7.
    pub fn precondition_violated(reason: &str, action: &str) -> Self {
        ControlReply {
            success: false,
            error: Some(format!("precondition violated: {reason}")),
            data: serde_json::json!({ "reason": reason, "action": action }),
        }
    }
}

impl From<&crate::error::IsiError> for ControlReply {
    fn from(err: &crate::error::IsiError) -> Self {
        if let Some((reason, action)) = err.reason_action() {
            Self::precondition_violated(reason, action)
        } else {
            Self::err(err.to_string())
        }
    }
}

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, ControlReply> + Send + Sync>;

/// The command dispatch table. One outstanding request at a time per client
/// is a caller-side concern (spec.md §4.3); the bus itself is stateless
/// between calls and freely reentrant.
#[derive(Default)]
pub struct ControlBus {
    handlers: HashMap<String, Handler>,
}

impl ControlBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, command: &str, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, ControlReply> + Send + Sync + 'static,
    {
        self.handlers.insert(command.to_string(), Box::new(handler));
    }

    pub async fn dispatch(&self, request: ControlRequest) -> ControlReply {
        match self.handlers.get(&request.command) {
            Some(handler) => handler(request.payload).await,
            None => {
                warn!("control bus received unknown command '{}'", request.command);
                ControlReply::err(format!("Unknown command type: {}", request.command))
            }
        }
    }

    /// Pump requests from `rx` through the dispatch table until the channel
    /// closes. This models the lifecycle orchestrator's "control-channel
    /// event loop" (spec.md §4.12); the loop itself is in scope, the
    /// transport that feeds `rx` is not.
    pub async fn serve(&self, mut rx: mpsc::Receiver<(ControlRequest, oneshot::Sender<ControlReply>)>) {
        while let Some((request, reply_tx)) = rx.recv().await {
            let reply = self.dispatch(request).await;
            let _ = reply_tx.send(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_replies_pong() {
        let mut bus = ControlBus::new();
        bus.register("ping", |_| Box::pin(async { ControlReply::ok(serde_json::json!("pong")) }));

        let reply = bus
            .dispatch(ControlRequest {
                command: "ping".into(),
                payload: Value::Null,
            })
            .await;
        assert_eq!(reply.data, serde_json::json!("pong"));
        assert!(reply.success);
    }

    #[tokio::test]
    async fn unknown_command_reports_its_type() {
        let bus = ControlBus::new();
        let reply = bus
            .dispatch(ControlRequest {
                command: "frobnicate".into(),
                payload: Value::Null,
            })
            .await;
        assert!(!reply.success);
        assert_eq!(
            reply.error.unwrap(),
            "Unknown command type: frobnicate"
        );
    }

    #[tokio::test]
    async fn serve_pumps_requests_to_completion() {
        let mut bus = ControlBus::new();
        bus.register("ping", |_| Box::pin(async { ControlReply::ok(serde_json::json!("pong")) }));
        let bus = std::sync::Arc::new(bus);

        let (tx, rx) = mpsc::channel(4);
        let serve_bus = bus.clone();
        let handle = tokio::spawn(async move { serve_bus.serve(rx).await });

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((
            ControlRequest {
                command: "ping".into(),
                payload: Value::Null,
            },
            reply_tx,
        ))
        .await
        .unwrap();
        let reply = reply_rx.await.unwrap();
        assert!(reply.success);

        drop(tx);
        handle.await.unwrap();
    }
}
