//! OSCAR rendezvous connection negotiation.
//!
//! Establishes direct or relayed peer-to-peer streams for file transfer and
//! direct IM. A `RendezvousSession` owns every live transfer and runs as a
//! single task: ICBM notifications, UI decisions, connection attempts, timers
//! and stream pumps all report into its inbox, and only that task mutates
//! transfer state.
//!
//! Connection strategy, per transfer:
//! - direct connect to the peer's client IP, then its server-verified IP
//! - redirect: the receiver listens and asks the sender to connect instead
//! - proxy relay, stages 1 to 3, each with its own login roles
//!
//! Every strategy runs under a timeout that escalates to the next one.

pub mod config;
pub mod error;
pub mod handle;
pub mod image_store;
pub mod loopback;
pub mod selector;
pub mod session;
pub mod transfer;
pub mod transport;

mod attempt;
mod dim;
mod pump;

pub use attempt::RendezvousProxyInfo;
pub use config::{RendezvousConfig, TimeoutPolicy};
pub use error::RendezvousError;
pub use handle::{Decision, SessionHandle};
pub use image_store::ImageStore;
pub use selector::{LoginRole, Step};
pub use session::{RendezvousSession, SessionOutputs};
pub use transfer::{DirectImState, Transfer, TransferState};
pub use transport::{PeerIo, PeerStream, TcpTransport, Transport};
