//! Live push to dashboard sockets.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `envelope` | `{type, data}` message wrapper and its wire text |
//! | `connection` | `Connection` trait and the queue-backed handle sockets register |
//! | `registry` | Channel membership, concurrent fan-out, pruning of dead peers |

mod connection;
mod envelope;
mod registry;

pub use connection::{Connection, QueuedConnection};
pub use envelope::{Envelope, event_types};
pub use registry::{ChannelRegistry, DEFAULT_SEND_TIMEOUT};

/// Channel every ward-staff dashboard subscribes to.
pub const STATION_CHANNEL: &str = "STATION";
