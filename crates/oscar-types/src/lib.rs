//! Value types shared by the rendezvous engine, its wire codecs and its
//! collaborators (the ICBM envelope layer and the UI).

pub mod events;
pub mod models;

pub use events::{
    FailureReason, IcbmCommand, IcbmEvent, ReceivedImage, RendezvousEvent, RendezvousPropose,
};
pub use models::{
    Capability, ConnectionMethod, Cookie, FileMeta, PeerHints, ProxyStage, Role,
    normalize_screen_name,
};
