// Live stream connection: lifecycle state machine, transport seam and the
// session task that ties them to the store.

pub mod machine;
pub mod session;
pub mod transport;

pub use machine::{Backoff, ConnectionState};
pub use session::{HeartbeatPolicy, LiveSession, SessionConfig, SessionError, SessionEvent};
pub use transport::{Connector, Frame, Transport, TransportError, TungsteniteConnector};
