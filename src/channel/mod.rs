//! Method-channel front end: decodes `{method, arguments}` calls, runs them
//! against a session in arrival order and replies with a value or a coded
//! error.

pub mod args;
pub mod commands;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::session::{SessionError, SessionEvent, SessionHandle};

/// One call from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Error reply: a stable code plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ChannelError {
    pub code: String,
    pub message: String,
}

impl From<SessionError> for ChannelError {
    fn from(err: SessionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Reply = Box<dyn FnOnce(Result<Value, ChannelError>) + Send>;

struct Pending {
    call: MethodCall,
    reply: Reply,
}

/// Dispatches calls on a single task so replies come back in call order.
#[derive(Clone)]
pub struct MethodChannel {
    session: SessionHandle,
    tx: mpsc::UnboundedSender<Pending>,
}

impl MethodChannel {
    /// Must be called inside a tokio runtime.
    pub fn new(session: SessionHandle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();
        let dispatcher = session.clone();
        tokio::spawn(async move {
            while let Some(Pending { call, reply }) = rx.recv().await {
                let result = commands::dispatch(&dispatcher, &call.method, &call.arguments).await;
                if let Err(err) = &result {
                    debug!(method = %call.method, code = err.code(), "method call failed");
                }
                reply(result.map_err(ChannelError::from));
            }
            debug!("method channel closed");
        });
        Self { session, tx }
    }

    /// Queue a call and return immediately; `reply` runs once it completes.
    pub fn invoke<F>(&self, call: MethodCall, reply: F)
    where
        F: FnOnce(Result<Value, ChannelError>) + Send + 'static,
    {
        if let Err(mpsc::error::SendError(pending)) = self.tx.send(Pending {
            call,
            reply: Box::new(reply),
        }) {
            warn!(method = %pending.call.method, "method channel dispatcher is gone");
            (pending.reply)(Err(SessionError::NotInitialized.into()));
        }
    }

    /// Queue a call and wait for its reply.
    pub async fn call(&self, call: MethodCall) -> Result<Value, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.invoke(call, move |result| {
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(SessionError::NotInitialized.into()))
    }

    /// Session events as they would be forwarded on the event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}
