//! `wb-transport`: the messaging transport capability behind the session
//! controller.
//!
//! A [`Transport`] owns at most one live WhatsApp Web session.  It reports
//! everything that happens to that session as [`TransportEvent`]s on the
//! sink handed to [`Transport::open`]; the session controller is the only
//! consumer.
//!
//! Two implementations ship here:
//!
//! - [`BridgeTransport`] drives an external WhatsApp Web bridge over HTTP.
//! - [`LoopbackTransport`] stays in-process; its [`LoopbackHandle`] lets a
//!   developer or a test script the remote side.
//!
//! [`AuthStore`] persists the credential blob a transport reports through
//! [`TransportEvent::CredentialsUpdated`].

pub mod auth_store;
pub mod bridge;
pub mod loopback;
pub mod types;

pub use auth_store::AuthStore;
pub use bridge::BridgeTransport;
pub use loopback::{LoopbackHandle, LoopbackTransport, SentRecord};
pub use types::{EventSink, OutboundPayload, Transport, TransportError, TransportEvent};
