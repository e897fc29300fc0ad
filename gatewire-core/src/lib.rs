//! Gatewire core: per-session tunnel engine, registry, correlation and stats.
//!
//! The crates above this one supply the concrete edges: `gatewire-ssh` drives
//! a [`Forwarder`](forward::Forwarder) per authenticated transport session,
//! and `gatewire-http` feeds inbound public connections through the
//! [`SessionRegistry`](registry::SessionRegistry).

pub mod correlate;
pub mod events;
pub mod forward;
pub mod identity;
pub mod registry;
pub mod stats;
pub mod transport;

pub use correlate::{CorrelatedStream, Exchange, RequestHead, ResponseHead};
pub use events::{DiagnosticSink, NoopObserver, TunnelObserver};
pub use forward::{BindTarget, Forwarder, ForwarderState};
pub use identity::{Credential, IdentityConfig, IdentityDirectory};
pub use registry::SessionRegistry;
pub use stats::{ActivityRing, SessionStats, StatSnapshot};
pub use transport::{BoxedStream, SessionTransport, TunnelStream};
