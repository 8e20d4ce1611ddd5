use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use oscar_oft::DirectImBody;
use oscar_types::{
    Capability, Cookie, FailureReason, FileMeta, IcbmCommand, IcbmEvent, PeerHints, ProxyStage,
    ReceivedImage, RendezvousEvent, RendezvousPropose, Role,
};

use crate::attempt::{AttemptPlan, AttemptReport, RelayLogin, RendezvousProxyInfo, spawn_attempt};
use crate::config::RendezvousConfig;
use crate::dim::{self, DimCommand};
use crate::error::RendezvousError;
use crate::handle::{Decision, LocalCommand, SessionHandle};
use crate::image_store::ImageStore;
use crate::pump::{self, ReceiveJob, SendJob};
use crate::selector::{
    LoginRole, Step, initial_receive_step, initial_send_step, next_step, redirect_step,
};
use crate::transfer::{DirectImState, Transfer, TransferState};
use crate::transport::{PeerStream, Transport};

/// Everything the session task reacts to.
pub(crate) enum SessionInput {
    Icbm(IcbmEvent),
    Command(LocalCommand),
    Attempt {
        cookie: Cookie,
        generation: u64,
        report: AttemptReport,
    },
    Timer {
        cookie: Cookie,
        generation: u64,
    },
    Pump {
        cookie: Cookie,
        generation: u64,
        report: PumpReport,
    },
}

pub(crate) enum PumpReport {
    /// Handshake done; payload follows.
    Established,
    Progress(u64),
    ImReceived(DirectImBody),
    Finished(Result<(), RendezvousError>),
}

/// Posts reports for one attempt generation of one transfer.
///
/// Holds a weak sender: background tasks never keep the session alive once
/// every `SessionHandle` is gone.
#[derive(Clone)]
pub(crate) struct Reporter {
    pub cookie: Cookie,
    generation: u64,
    tx: mpsc::WeakUnboundedSender<SessionInput>,
}

impl Reporter {
    fn new(cookie: Cookie, generation: u64, tx: mpsc::WeakUnboundedSender<SessionInput>) -> Self {
        Self {
            cookie,
            generation,
            tx,
        }
    }

    pub fn attempt(&self, report: AttemptReport) {
        self.post(SessionInput::Attempt {
            cookie: self.cookie,
            generation: self.generation,
            report,
        });
    }

    pub fn pump(&self, report: PumpReport) {
        self.post(SessionInput::Pump {
            cookie: self.cookie,
            generation: self.generation,
            report,
        });
    }

    fn timer(&self) {
        self.post(SessionInput::Timer {
            cookie: self.cookie,
            generation: self.generation,
        });
    }

    fn post(&self, input: SessionInput) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(input);
        }
    }
}

/// Receivers for what the session emits.
pub struct SessionOutputs {
    /// Proposes and cancels for the ICBM layer to put on the wire.
    pub icbm: mpsc::UnboundedReceiver<IcbmCommand>,
    /// Progress and outcome notifications for the UI.
    pub events: mpsc::UnboundedReceiver<RendezvousEvent>,
}

/// Owns every live transfer for one signed-on account.
pub struct RendezvousSession {
    config: Arc<RendezvousConfig>,
    transport: Arc<dyn Transport>,
    transfers: HashMap<Cookie, Transfer>,
    images: ImageStore,
    inbox: mpsc::UnboundedReceiver<SessionInput>,
    inbox_tx: mpsc::WeakUnboundedSender<SessionInput>,
    icbm: mpsc::UnboundedSender<IcbmCommand>,
    events: mpsc::UnboundedSender<RendezvousEvent>,
}

impl RendezvousSession {
    pub fn new(
        config: RendezvousConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, SessionHandle, SessionOutputs) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (icbm, icbm_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let session = Self {
            config: Arc::new(config),
            transport,
            transfers: HashMap::new(),
            images: ImageStore::default(),
            inbox,
            inbox_tx: inbox_tx.downgrade(),
            icbm,
            events,
        };
        let outputs = SessionOutputs {
            icbm: icbm_rx,
            events: events_rx,
        };
        (session, SessionHandle::new(inbox_tx), outputs)
    }

    /// Create a session and run it on its own task.
    pub fn spawn(
        config: RendezvousConfig,
        transport: Arc<dyn Transport>,
    ) -> (SessionHandle, SessionOutputs, JoinHandle<()>) {
        let (session, handle, outputs) = Self::new(config, transport);
        let task = tokio::spawn(session.run());
        (handle, outputs, task)
    }

    /// Process inputs until `shutdown` or until the last handle is dropped,
    /// then cancel whatever is still live.
    pub async fn run(mut self) {
        info!(screen_name = %self.config.screen_name, "rendezvous session started");
        loop {
            let Some(input) = self.inbox.recv().await else {
                debug!("every session handle dropped");
                break;
            };
            if !self.dispatch(input) {
                break;
            }
        }

        let live: Vec<Cookie> = self.transfers.keys().copied().collect();
        for cookie in live {
            self.fail(cookie, FailureReason::CancelledLocally, true);
        }
        info!(screen_name = %self.config.screen_name, "rendezvous session stopped");
    }

    fn dispatch(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Icbm(event) => self.on_icbm(event),
            SessionInput::Command(LocalCommand::Shutdown) => return false,
            SessionInput::Command(command) => self.on_command(command),
            SessionInput::Attempt {
                cookie,
                generation,
                report,
            } => self.on_attempt(cookie, generation, report),
            SessionInput::Timer { cookie, generation } => self.on_timer(cookie, generation),
            SessionInput::Pump {
                cookie,
                generation,
                report,
            } => self.on_pump(cookie, generation, report),
        }
        true
    }

    // --- Inbound ICBM ---

    fn on_icbm(&mut self, event: IcbmEvent) {
        match event {
            IcbmEvent::Propose(propose) => self.on_propose(propose),
            IcbmEvent::Cancel { peer, cookie } => match self.transfers.get(&cookie) {
                Some(t) if t.is_peer(&peer) => {
                    info!(%cookie, %peer, "peer cancelled rendezvous");
                    self.fail(cookie, FailureReason::CancelledByPeer, false);
                }
                Some(_) => warn!(%cookie, %peer, "cancel from a different screen name, ignoring"),
                None => debug!(%cookie, "cancel for unknown cookie"),
            },
            IcbmEvent::Accept { peer, cookie } => match self.transfers.get(&cookie) {
                Some(t) if t.is_peer(&peer) => debug!(%cookie, %peer, "peer accepted propose"),
                _ => debug!(%cookie, %peer, "stray accept"),
            },
        }
    }

    fn on_propose(&mut self, propose: RendezvousPropose) {
        let cookie = propose.cookie;
        let Some(capability) = Capability::from_uuid(propose.capability) else {
            debug!(%cookie, capability = %propose.capability, "unsupported rendezvous capability");
            return;
        };

        if let Some(t) = self.transfers.get(&cookie) {
            if !t.is_peer(&propose.peer) {
                warn!(%cookie, peer = %propose.peer, "propose reuses a cookie owned by another peer");
            } else if propose.reqnum <= 1 {
                warn!(%cookie, "duplicate initial propose, ignoring");
            } else {
                self.on_redirect(propose);
            }
            return;
        }

        if propose.reqnum > 1 {
            debug!(%cookie, reqnum = propose.reqnum, "re-propose for unknown cookie");
            return;
        }

        let event = match (capability, propose.file.clone()) {
            (Capability::SendFile, Some(file)) => RendezvousEvent::TransferRequested {
                cookie,
                peer: propose.peer.clone(),
                file,
            },
            (Capability::SendFile, None) => {
                warn!(%cookie, "send-file propose without file description");
                return;
            }
            (Capability::DirectIm, _) => RendezvousEvent::DirectImRequested {
                cookie,
                peer: propose.peer.clone(),
            },
        };

        let mut t = Transfer::new(cookie, Role::Receive, capability, &propose.peer);
        t.file = propose.file;
        t.hints = propose.hints;
        t.peer_reqnum = propose.reqnum;
        t.state = TransferState::AwaitingDecision;
        info!(%cookie, peer = %t.peer, ?capability, "inbound rendezvous request");
        self.transfers.insert(cookie, t);
        self.emit(event);
    }

    /// Peer re-proposed an existing cookie with new connection details.
    fn on_redirect(&mut self, propose: RendezvousPropose) {
        let cookie = propose.cookie;
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        if t.success {
            warn!(%cookie, "re-propose after connection established, ignoring");
            return;
        }
        if t.state == TransferState::AwaitingDecision {
            debug!(%cookie, reqnum = propose.reqnum, "peer updated its offer before we answered");
            t.hints = propose.hints;
            t.peer_reqnum = propose.reqnum;
            return;
        }

        let creating_stage3 = t.step
            == Some(Step::Proxy {
                stage: ProxyStage::Stage3,
                login: LoginRole::Create,
            });
        if creating_stage3 && propose.reqnum == 3 && propose.hints.use_proxy && t.role == Role::Send {
            info!(%cookie, "both sides created stage-3 relay sessions, keeping ours");
            return;
        }

        t.hints = propose.hints;
        t.peer_reqnum = propose.reqnum;
        let step = redirect_step(propose.reqnum, &t.hints);
        info!(%cookie, reqnum = propose.reqnum, ?step, "peer redirected connection");
        self.start_step(cookie, step);
    }

    // --- Local commands ---

    fn on_command(&mut self, command: LocalCommand) {
        match command {
            LocalCommand::ProposeSend {
                peer,
                path,
                file,
                reply,
            } => {
                let cookie = self.propose_send(&peer, path, file);
                let _ = reply.send(cookie);
            }
            LocalCommand::ProposeDirectIm { peer, reply } => {
                let cookie = self.propose_direct_im(&peer);
                let _ = reply.send(cookie);
            }
            LocalCommand::Respond { cookie, decision } => self.respond(cookie, decision),
            LocalCommand::Cancel { cookie } => {
                if self.transfers.contains_key(&cookie) {
                    info!(%cookie, "cancelled locally");
                    self.fail(cookie, FailureReason::CancelledLocally, true);
                } else {
                    debug!(%cookie, "cancel for unknown cookie");
                }
            }
            LocalCommand::SendIm { cookie, text } => self.send_im(cookie, &text),
            LocalCommand::Close { cookie } => self.close(cookie),
            LocalCommand::AddImage { id, name, data } => {
                debug!(id, %name, bytes = data.len(), "registered inline image");
                self.images.insert(id, name, data);
            }
            LocalCommand::RemoveImage { id } => {
                if self.images.remove(id).is_none() {
                    debug!(id, "no inline image to remove");
                }
            }
            LocalCommand::Shutdown => {}
        }
    }

    fn propose_send(&mut self, peer: &str, path: PathBuf, file: FileMeta) -> Cookie {
        let cookie = self.fresh_cookie();
        let mut t = Transfer::new(cookie, Role::Send, Capability::SendFile, peer);
        info!(%cookie, %peer, name = %file.name, size = file.size, "offering file");
        t.file = Some(file);
        t.local_path = Some(path);
        self.transfers.insert(cookie, t);
        self.start_step(cookie, initial_send_step(self.config.always_use_proxy));
        cookie
    }

    fn propose_direct_im(&mut self, peer: &str) -> Cookie {
        let cookie = self.fresh_cookie();
        info!(%cookie, %peer, "requesting direct IM");
        self.transfers
            .insert(cookie, Transfer::new(cookie, Role::Send, Capability::DirectIm, peer));
        self.start_step(cookie, initial_send_step(self.config.always_use_proxy));
        cookie
    }

    fn respond(&mut self, cookie: Cookie, decision: Decision) {
        let Some(t) = self.transfers.get_mut(&cookie) else {
            warn!(%cookie, "decision for unknown cookie");
            return;
        };
        if t.state != TransferState::AwaitingDecision {
            warn!(%cookie, "no decision pending");
            return;
        }

        match decision {
            Decision::Deny => {
                info!(%cookie, "request declined");
                self.fail(cookie, FailureReason::CancelledLocally, true);
            }
            Decision::Accept { save_to } => {
                if t.capability == Capability::SendFile {
                    let name = t.file.as_ref().map_or("", |f| f.name.as_str());
                    let path = save_to
                        .unwrap_or_else(|| self.config.download_dir.join(sanitize_file_name(name)));
                    t.local_path = Some(path);
                }
                let step = initial_receive_step(t.peer_reqnum, &t.hints);
                info!(%cookie, "request accepted");
                self.start_step(cookie, step);
            }
        }
    }

    fn send_im(&mut self, cookie: Cookie, text: &str) {
        let Some(t) = self.transfers.get(&cookie) else {
            warn!(%cookie, "message for unknown direct IM");
            return;
        };
        match (t.direct_im_state(), &t.dim_tx) {
            (Some(DirectImState::Connected), Some(tx)) => match self.images.message(text) {
                Ok(payload) => {
                    let _ = tx.send(DimCommand::Send(payload));
                }
                Err(e) => warn!(%cookie, error = %e, "direct IM not sent"),
            },
            _ => warn!(%cookie, "direct IM is not connected, message dropped"),
        }
    }

    fn close(&mut self, cookie: Cookie) {
        let Some(t) = self.transfers.get(&cookie) else {
            debug!(%cookie, "close for unknown cookie");
            return;
        };
        match (t.direct_im_state(), &t.dim_tx) {
            (Some(DirectImState::Connected), Some(tx)) => {
                let _ = tx.send(DimCommand::Close);
            }
            _ => self.fail(cookie, FailureReason::CancelledLocally, true),
        }
    }

    // --- Connection ladder ---

    fn start_step(&mut self, cookie: Cookie, step: Step) {
        let config = Arc::clone(&self.config);
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        let generation = t.begin_step(step);

        let plan = match step {
            Step::Listen | Step::RedirectWait => Some(AttemptPlan::Listen {
                ip: config.listen_ip,
            }),
            Step::Proxy {
                stage,
                login: LoginRole::Create,
            } => Some(AttemptPlan::ProxyCreate(RelayLogin {
                host: config.proxy_host.clone(),
                port: config.proxy_port,
                screen_name: config.screen_name.clone(),
                cookie,
                capability: t.capability.uuid(),
                stage,
            })),
            Step::Proxy {
                stage,
                login: LoginRole::Join,
            } => step.target(&t.hints).map(|(ip, port)| AttemptPlan::ProxyJoin {
                login: RelayLogin {
                    host: ip.to_string(),
                    port: config.proxy_port,
                    screen_name: config.screen_name.clone(),
                    cookie,
                    capability: t.capability.uuid(),
                    stage,
                },
                port,
            }),
            _ => step
                .target(&t.hints)
                .map(|(ip, port)| AttemptPlan::Connect { ip, port }),
        };
        let Some(plan) = plan else {
            debug!(%cookie, ?step, "no address for this method, skipping");
            self.escalate(cookie);
            return;
        };

        info!(%cookie, ?step, method = ?step.method(), stage = ?step.stage(), "connection attempt");
        let reporter = Reporter::new(cookie, generation, self.inbox_tx.clone());
        t.set_attempt(spawn_attempt(plan, Arc::clone(&self.transport), reporter.clone()));
        t.arm_timer(spawn_timer(step.timeout(&config.timeouts), reporter));

        self.emit(RendezvousEvent::Connecting {
            cookie,
            method: step.method(),
            stage: step.stage(),
        });
    }

    fn escalate(&mut self, cookie: Cookie) {
        let Some(t) = self.transfers.get(&cookie) else {
            return;
        };
        let Some(step) = t.step else {
            return;
        };
        match next_step(step, &t.hints) {
            Some(next) => {
                debug!(%cookie, from = ?step, to = ?next, "escalating");
                self.start_step(cookie, next);
            }
            None => {
                let reason = match t.proxy_rejection {
                    Some(code) => FailureReason::ProxyLoginFailed { code },
                    None => FailureReason::PeerUnreachable,
                };
                self.fail(cookie, reason, true);
            }
        }
    }

    fn on_attempt(&mut self, cookie: Cookie, generation: u64, report: AttemptReport) {
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        if t.success || !t.is_current(generation) {
            debug!(%cookie, generation, "stale attempt report");
            return;
        }

        match report {
            AttemptReport::Listening { port } => self.propose_listener(cookie, port),
            AttemptReport::RelayAssigned(info) => self.advertise_relay(info),
            AttemptReport::Connected(stream) => self.on_connected(cookie, stream),
            AttemptReport::Failed(err) => {
                warn!(%cookie, step = ?t.step, error = %err, "connection attempt failed");
                if let Some(code) = err.relay_rejection() {
                    t.proxy_rejection = Some(code.0);
                }
                self.escalate(cookie);
            }
        }
    }

    fn on_timer(&mut self, cookie: Cookie, generation: u64) {
        let Some(t) = self.transfers.get(&cookie) else {
            return;
        };
        if t.success || !t.is_current(generation) {
            return;
        }
        info!(%cookie, step = ?t.step, "connection attempt timed out");
        self.escalate(cookie);
    }

    /// Our listener is up: tell the peer where to connect.
    fn propose_listener(&mut self, cookie: Cookie, port: u16) {
        let reqnum = match self.transfers.get(&cookie).and_then(|t| t.step) {
            Some(Step::RedirectWait) => 2,
            _ => 1,
        };
        let hints = PeerHints {
            client_ip: self.config.advertised_ip(),
            verified_ip: None,
            proxy_ip: None,
            port,
            use_proxy: false,
        };
        self.send_propose(cookie, reqnum, hints);
    }

    fn advertise_relay(&mut self, info: RendezvousProxyInfo) {
        let hints = PeerHints {
            client_ip: self.config.advertised_ip(),
            verified_ip: None,
            proxy_ip: Some(info.ip),
            port: info.port,
            use_proxy: true,
        };
        self.send_propose(info.cookie, info.stage.reqnum(), hints);
    }

    fn send_propose(&mut self, cookie: Cookie, reqnum: u16, hints: PeerHints) {
        let Some(t) = self.transfers.get(&cookie) else {
            return;
        };
        let file = match (reqnum, t.role) {
            (1, Role::Send) => t.file.clone(),
            _ => None,
        };
        debug!(%cookie, reqnum, port = hints.port, proxy = hints.use_proxy, "sending propose");
        let _ = self.icbm.send(IcbmCommand::Propose(RendezvousPropose {
            peer: t.peer.clone(),
            reqnum,
            capability: t.capability.uuid(),
            cookie,
            hints,
            file,
            message: None,
        }));
    }

    fn on_connected(&mut self, cookie: Cookie, stream: PeerStream) {
        let config = Arc::clone(&self.config);
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        t.mark_connected();
        let method = t.step.map(Step::method);
        let stage = t.stage();
        info!(%cookie, ?method, ?stage, "connected to peer");

        let reporter = Reporter::new(cookie, t.generation(), self.inbox_tx.clone());
        let local_path = t.local_path.clone().unwrap_or_default();
        let handle = match (t.capability, t.role) {
            (Capability::SendFile, Role::Send) => {
                let job = SendJob {
                    cookie,
                    path: local_path,
                    name: t.file.as_ref().map(|f| f.name.clone()).unwrap_or_default(),
                    chunk_size: config.chunk_size,
                };
                spawn_pump(pump::send_file(stream, job, reporter.clone()), reporter)
            }
            (Capability::SendFile, Role::Receive) => {
                let job = ReceiveJob {
                    cookie,
                    path: local_path,
                    chunk_size: config.chunk_size,
                };
                spawn_pump(pump::receive_file(stream, job, reporter.clone()), reporter)
            }
            (Capability::DirectIm, _) => {
                let (tx, rx) = mpsc::unbounded_channel();
                t.dim_tx = Some(tx);
                let session = dim::run_direct_im(
                    stream,
                    cookie,
                    config.screen_name.clone(),
                    rx,
                    reporter.clone(),
                );
                spawn_pump(session, reporter)
            }
        };
        t.set_pump(handle);

        if let Some(method) = method {
            self.emit(RendezvousEvent::Connected {
                cookie,
                method,
                stage,
            });
        }
    }

    fn on_pump(&mut self, cookie: Cookie, generation: u64, report: PumpReport) {
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        if !t.is_current(generation) {
            return;
        }

        match report {
            PumpReport::Established => t.established = true,
            PumpReport::Progress(bytes_done) => {
                let bytes_total = t.file.as_ref().map_or(0, |f| f.size);
                self.emit(RendezvousEvent::Progress {
                    cookie,
                    bytes_done,
                    bytes_total,
                });
            }
            PumpReport::ImReceived(body) => {
                let event = RendezvousEvent::DirectImReceived {
                    cookie,
                    peer: t.peer.clone(),
                    text: body.text,
                    images: body
                        .images
                        .into_iter()
                        .map(|i| ReceivedImage {
                            id: i.id,
                            name: i.name,
                            data: i.data,
                        })
                        .collect(),
                };
                self.emit(event);
            }
            PumpReport::Finished(Ok(())) => {
                let saved_to = match (t.capability, t.role) {
                    (Capability::SendFile, Role::Receive) => t.local_path.clone(),
                    _ => None,
                };
                self.complete(cookie, saved_to);
            }
            PumpReport::Finished(Err(err)) if !t.established && err.retry_elsewhere() => {
                warn!(%cookie, error = %err, "peer failed the handshake");
                self.retry_after_handshake(cookie, err);
            }
            PumpReport::Finished(Err(err)) => {
                warn!(%cookie, error = %err, "stream ended with error");
                self.fail(cookie, err.stream_failure(), true);
            }
        }
    }

    /// A stream that never got past the OFT or cookie handshake counts as a
    /// failed attempt: move on to the next method if there is one.
    fn retry_after_handshake(&mut self, cookie: Cookie, err: RendezvousError) {
        let Some(t) = self.transfers.get_mut(&cookie) else {
            return;
        };
        match t.step.and_then(|step| next_step(step, &t.hints)) {
            Some(next) => {
                t.reopen();
                debug!(%cookie, to = ?next, "escalating after handshake failure");
                self.start_step(cookie, next);
            }
            None => self.fail(cookie, err.stream_failure(), true),
        }
    }

    // --- Terminal transitions ---

    fn complete(&mut self, cookie: Cookie, saved_to: Option<PathBuf>) {
        if self.transfers.remove(&cookie).is_none() {
            return;
        }
        info!(%cookie, "rendezvous completed");
        self.emit(RendezvousEvent::Completed { cookie, saved_to });
    }

    fn fail(&mut self, cookie: Cookie, reason: FailureReason, notify_peer: bool) {
        let Some(t) = self.transfers.remove(&cookie) else {
            return;
        };
        if notify_peer {
            let _ = self.icbm.send(IcbmCommand::Cancel {
                peer: t.peer.clone(),
                cookie,
            });
        }
        drop(t);
        info!(%cookie, %reason, "rendezvous failed");
        self.emit(RendezvousEvent::Failed { cookie, reason });
    }

    fn emit(&self, event: RendezvousEvent) {
        let _ = self.events.send(event);
    }

    fn fresh_cookie(&self) -> Cookie {
        loop {
            let cookie = Cookie::random();
            if !self.transfers.contains_key(&cookie) {
                return cookie;
            }
        }
    }
}

fn spawn_timer(after: Duration, reporter: Reporter) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        reporter.timer();
    })
    .abort_handle()
}

fn spawn_pump<F>(stream_task: F, reporter: Reporter) -> AbortHandle
where
    F: Future<Output = Result<(), RendezvousError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = stream_task.await;
        reporter.pump(PumpReport::Finished(result));
    })
    .abort_handle()
}

/// Last path component of a peer-supplied file name, with either separator.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match base {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}
