use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use oscar_types::{Cookie, FileMeta, IcbmEvent};

use crate::error::RendezvousError;
use crate::session::SessionInput;

/// The local user's answer to an inbound propose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Accept. For file transfers, `save_to` overrides the default path in
    /// the download directory.
    Accept { save_to: Option<PathBuf> },
    Deny,
}

/// Local requests, applied in order by the session task.
#[derive(Debug)]
pub(crate) enum LocalCommand {
    ProposeSend {
        peer: String,
        path: PathBuf,
        file: FileMeta,
        reply: oneshot::Sender<Cookie>,
    },
    ProposeDirectIm {
        peer: String,
        reply: oneshot::Sender<Cookie>,
    },
    Respond {
        cookie: Cookie,
        decision: Decision,
    },
    Cancel {
        cookie: Cookie,
    },
    SendIm {
        cookie: Cookie,
        text: String,
    },
    Close {
        cookie: Cookie,
    },
    AddImage {
        id: u32,
        name: String,
        data: Vec<u8>,
    },
    RemoveImage {
        id: u32,
    },
    Shutdown,
}

/// Cloneable front door to a running `RendezvousSession`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { tx }
    }

    /// Feed a rendezvous notification parsed by the ICBM layer.
    pub fn deliver(&self, event: IcbmEvent) -> Result<(), RendezvousError> {
        self.send(SessionInput::Icbm(event))
    }

    /// Offer a file to `peer`. Returns the cookie identifying the transfer.
    pub async fn propose_send(
        &self,
        peer: &str,
        path: impl AsRef<Path>,
    ) -> Result<Cookie, RendezvousError> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(RendezvousError::LocalFile)?;
        if meta.len() > u64::from(u32::MAX) {
            return Err(RendezvousError::FileTooLarge(meta.len()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let (reply, rx) = oneshot::channel();
        self.command(LocalCommand::ProposeSend {
            peer: peer.to_string(),
            path,
            file: FileMeta {
                name,
                size: meta.len(),
            },
            reply,
        })?;
        rx.await.map_err(|_| RendezvousError::SessionClosed)
    }

    /// Ask `peer` for a direct IM connection.
    pub async fn propose_direct_im(&self, peer: &str) -> Result<Cookie, RendezvousError> {
        let (reply, rx) = oneshot::channel();
        self.command(LocalCommand::ProposeDirectIm {
            peer: peer.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| RendezvousError::SessionClosed)
    }

    pub fn respond(&self, cookie: Cookie, decision: Decision) -> Result<(), RendezvousError> {
        self.command(LocalCommand::Respond { cookie, decision })
    }

    pub fn cancel(&self, cookie: Cookie) -> Result<(), RendezvousError> {
        self.command(LocalCommand::Cancel { cookie })
    }

    /// Send a message on a connected direct IM. `<IMG ID="n">` tags refer to
    /// images registered with `add_image`.
    pub fn send_im(&self, cookie: Cookie, text: impl Into<String>) -> Result<(), RendezvousError> {
        self.command(LocalCommand::SendIm {
            cookie,
            text: text.into(),
        })
    }

    /// End a direct IM session normally.
    pub fn close(&self, cookie: Cookie) -> Result<(), RendezvousError> {
        self.command(LocalCommand::Close { cookie })
    }

    pub fn add_image(
        &self,
        id: u32,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<(), RendezvousError> {
        self.command(LocalCommand::AddImage {
            id,
            name: name.into(),
            data,
        })
    }

    /// Forget an image registered with `add_image`.
    pub fn remove_image(&self, id: u32) -> Result<(), RendezvousError> {
        self.command(LocalCommand::RemoveImage { id })
    }

    /// Cancel everything and stop the session task.
    pub fn shutdown(&self) -> Result<(), RendezvousError> {
        self.command(LocalCommand::Shutdown)
    }

    fn command(&self, command: LocalCommand) -> Result<(), RendezvousError> {
        self.send(SessionInput::Command(command))
    }

    fn send(&self, input: SessionInput) -> Result<(), RendezvousError> {
        self.tx
            .send(input)
            .map_err(|_| RendezvousError::SessionClosed)
    }
}
