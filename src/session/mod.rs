//! The session controller: owns one camera session from `initialize` to
//! `dispose` and serializes every mutating operation.

pub mod controller;
pub mod error;
pub mod events;
pub mod state;

pub use controller::{DetectorFactory, InitializeResult, SessionController, SessionHandle, SessionSnapshot};
pub use error::{Result, SessionError};
pub use events::{EventEmitter, SessionEvent, StopReason};
pub use state::SessionState;
