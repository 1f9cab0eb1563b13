pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod model;
pub mod negotiation;
pub mod peer;
pub mod scheduler;
pub mod signaling;
pub mod telemetry;

pub use controller::{CallController, CallDeps, CallSnapshot};
pub use error::{CallError, MediaAcquisitionError, NegotiationError, TransportError};
pub use model::{CallRole, CallStatus, CallType, ConnectionState, PartyId};
