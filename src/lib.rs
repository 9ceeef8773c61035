/// Ambient configuration: broker address, identity, timeouts, reply policy.
pub mod config;
/// Correlation of timed requests with their responses.
pub mod correlation;
/// Wire envelope and its JSON codec.
pub mod envelope;
/// Crate-local error types: settings, logging, subscription receive.
pub mod error;
/// Flexible logging (filters, console and file sinks).
pub mod logging;
/// Channel listeners and per-client listener registry.
pub mod listener;
/// Broker transports: in-process hub and RESP2 over TCP.
pub mod transport;

mod client;
mod manager;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Logical participant and the process-wide manager.
pub use client::Client;
/// Settings and reply routing.
pub use config::{ReplyPolicy, Settings};
/// Pending timed requests.
pub use correlation::{Correlator, PendingReply};
/// Envelope model.
pub use envelope::{Envelope, EnvelopeKind};
/// Crate-local errors.
pub use error::{LoggingError, RecvError, SettingsError};
/// Listener API.
pub use listener::{listener_fn, Delivery, DispatchReport, FnListener, Listener};
/// Logging bootstrap.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
pub use manager::Manager;
/// Error crate re-exports.
pub use relay_error::{
    CodecError, DuplicateRegistration, ErrorExt, ListenerError, RelayResult, RequestError,
    ResultExt, StackError, StatusCode, TransportError,
};
/// Transports.
pub use transport::{
    HubStats, MemoryBroker, MemoryTransport, RedisConfig, RedisTransport, Transport,
};
