use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use oscar_types::{
    Capability, ConnectionMethod, Cookie, FileMeta, PeerHints, ProxyStage, Role,
    normalize_screen_name,
};

use crate::dim::DimCommand;
use crate::selector::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Inbound propose shown to the user, no decision yet.
    AwaitingDecision,
    /// Walking the connection ladder.
    Negotiating,
    /// Stream established; the pump owns it.
    Connected,
}

/// Direct IM view of a transfer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectImState {
    PendingOutbound,
    PendingInbound,
    Connected,
}

/// Per-cookie negotiation record. Owned by the session task.
///
/// Every task handle is aborted when the record drops, so removing a
/// transfer from the session map releases its sockets and timers on every
/// exit path.
#[derive(Debug)]
pub struct Transfer {
    pub cookie: Cookie,
    pub role: Role,
    pub capability: Capability,
    pub peer: String,
    pub file: Option<FileMeta>,
    /// Source file when sending, destination when receiving.
    pub local_path: Option<PathBuf>,
    pub hints: PeerHints,
    /// Request number of the latest propose seen from the peer.
    pub peer_reqnum: u16,
    pub state: TransferState,
    pub step: Option<Step>,
    /// Set once a stream is up; late timers become no-ops.
    pub success: bool,
    /// The pump got past the OFT or cookie handshake.
    pub established: bool,
    /// Last relay rejection code seen on any proxy step.
    pub proxy_rejection: Option<u16>,
    generation: u64,
    attempt: Option<AbortHandle>,
    timer: Option<AbortHandle>,
    pump: Option<AbortHandle>,
    pub(crate) dim_tx: Option<mpsc::UnboundedSender<DimCommand>>,
}

impl Transfer {
    pub fn new(cookie: Cookie, role: Role, capability: Capability, peer: &str) -> Self {
        Self {
            cookie,
            role,
            capability,
            peer: peer.to_string(),
            file: None,
            local_path: None,
            hints: PeerHints::default(),
            peer_reqnum: 1,
            state: TransferState::Negotiating,
            step: None,
            success: false,
            established: false,
            proxy_rejection: None,
            generation: 0,
            attempt: None,
            timer: None,
            pump: None,
            dim_tx: None,
        }
    }

    pub fn method(&self) -> Option<ConnectionMethod> {
        self.step.map(Step::method)
    }

    pub fn stage(&self) -> ProxyStage {
        self.step.map_or(ProxyStage::None, Step::stage)
    }

    pub fn is_peer(&self, screen_name: &str) -> bool {
        normalize_screen_name(&self.peer) == normalize_screen_name(screen_name)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn has_pending_attempt(&self) -> bool {
        self.attempt.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn has_armed_timer(&self) -> bool {
        self.timer.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn direct_im_state(&self) -> Option<DirectImState> {
        if self.capability != Capability::DirectIm {
            return None;
        }
        Some(match (self.state, self.role) {
            (TransferState::Connected, _) => DirectImState::Connected,
            (_, Role::Send) => DirectImState::PendingOutbound,
            (_, Role::Receive) => DirectImState::PendingInbound,
        })
    }

    /// Tear down the in-flight attempt and timer, then move to `step`.
    /// Returns the generation that reports for the new attempt must carry.
    pub(crate) fn begin_step(&mut self, step: Step) -> u64 {
        abort(self.attempt.take());
        abort(self.timer.take());
        self.generation += 1;
        self.step = Some(step);
        self.state = TransferState::Negotiating;
        self.generation
    }

    pub(crate) fn set_attempt(&mut self, handle: AbortHandle) {
        abort(self.attempt.replace(handle));
    }

    pub(crate) fn arm_timer(&mut self, handle: AbortHandle) {
        abort(self.timer.replace(handle));
    }

    pub(crate) fn mark_connected(&mut self) {
        self.success = true;
        self.state = TransferState::Connected;
        abort(self.timer.take());
        self.attempt = None;
    }

    pub(crate) fn set_pump(&mut self, handle: AbortHandle) {
        abort(self.pump.replace(handle));
    }

    /// Undo `mark_connected` after the stream failed its handshake.
    pub(crate) fn reopen(&mut self) {
        self.success = false;
        self.established = false;
        self.state = TransferState::Negotiating;
        abort(self.pump.take());
        self.dim_tx = None;
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        abort(self.attempt.take());
        abort(self.timer.take());
        abort(self.pump.take());
        self.dim_tx = None;
    }
}

fn abort(handle: Option<AbortHandle>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}
