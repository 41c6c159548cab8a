//! `wb-session`: the connection-session lifecycle manager.
//!
//! One [`SessionController`] task owns the single transport session, the
//! pairing credential slot and the per-requester issuance history.  Callers
//! talk to it through a cloneable [`SessionHandle`]; transport events,
//! reconnect timers and caller commands all funnel into the same task so
//! state transitions never interleave.

pub mod adapter;
pub mod backoff;
pub mod clock;
pub mod controller;
pub mod credential;
pub mod error;
pub mod rate_limit;
pub mod render;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    AuthStatus, QrStatus, ReconnectionStatus, SentMessage, SessionController, SessionHandle,
    ANONYMOUS_REQUESTER, SYSTEM_REQUESTER,
};
pub use credential::{Credential, CredentialStore, CredentialView, SlotStatus};
pub use error::SessionError;
pub use rate_limit::{Decision, Denial, DenialReason, RateLimiter, RequesterStats};
pub use status::{Failure, SessionState, StatusPublisher, StatusSnapshot};
