//! Direct IM over an established stream.

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use oscar_oft::{DirectImBody, OdcFrame, OftError, read_frame, write_frame};
use oscar_types::Cookie;

use crate::error::RendezvousError;
use crate::session::{PumpReport, Reporter};
use crate::transport::PeerStream;

#[derive(Debug)]
pub(crate) enum DimCommand {
    /// Encoded message body.
    Send(Bytes),
    Close,
}

/// Exchange cookie frames, then relay messages both ways until either side
/// closes. A clean close from either end completes the session.
///
/// The reader half lives in a task owned by this future, so dropping the
/// future closes both halves of the stream.
pub(crate) async fn run_direct_im(
    stream: PeerStream,
    cookie: Cookie,
    screen_name: String,
    mut commands: mpsc::UnboundedReceiver<DimCommand>,
    reporter: Reporter,
) -> Result<(), RendezvousError> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    write_frame(&mut writer, &OdcFrame::cookie_frame(cookie, &screen_name)).await?;
    let hello = read_frame(&mut reader).await?;
    if hello.cookie != cookie {
        return Err(RendezvousError::Protocol(format!(
            "direct IM peer presented cookie {}",
            hello.cookie
        )));
    }
    debug!(%cookie, peer = %hello.screen_name, "direct IM cookie verified");
    reporter.pump(PumpReport::Established);

    let (frame_tx, mut frame_rx) = mpsc::channel(16);
    let mut reader_task = JoinSet::new();
    reader_task.spawn(async move {
        loop {
            let frame = read_frame(&mut reader).await;
            let stop = frame.is_err();
            if frame_tx.send(frame).await.is_err() || stop {
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(DimCommand::Send(payload)) => {
                    let frame = OdcFrame::message(cookie, &screen_name, payload, 0);
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        break Err(e.into());
                    }
                }
                Some(DimCommand::Close) | None => break Ok(()),
            },
            frame = frame_rx.recv() => match frame {
                Some(Ok(frame)) if frame.payload.is_empty() => {}
                Some(Ok(frame)) => match DirectImBody::decode(&frame.payload) {
                    Ok(body) => reporter.pump(PumpReport::ImReceived(body)),
                    Err(e) => warn!(%cookie, error = %e, "dropping malformed direct IM"),
                },
                Some(Err(OftError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(%cookie, "peer closed direct IM");
                    break Ok(());
                }
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
        }
    };

    reader_task.shutdown().await;
    let _ = writer.shutdown().await;
    result
}
