//! OFT byte pump: one file over an established stream.
//!
//! Exchange order: sender `PROMPT`, receiver `ACK`, raw bytes, receiver
//! `DONE`. Resume frames are not supported and end the transfer without
//! trying another connection method.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use oscar_oft::{OftChecksum, OftFrameType, OftHeader, read_header, write_header};
use oscar_types::Cookie;

use crate::error::RendezvousError;
use crate::session::{PumpReport, Reporter};
use crate::transport::PeerStream;

pub(crate) struct SendJob {
    pub cookie: Cookie,
    pub path: PathBuf,
    pub name: String,
    pub chunk_size: usize,
}

pub(crate) struct ReceiveJob {
    pub cookie: Cookie,
    pub path: PathBuf,
    pub chunk_size: usize,
}

pub(crate) async fn send_file(
    mut stream: PeerStream,
    job: SendJob,
    reporter: Reporter,
) -> Result<(), RendezvousError> {
    let meta = fs::metadata(&job.path).await.map_err(RendezvousError::LocalFile)?;
    let size = u32::try_from(meta.len()).map_err(|_| RendezvousError::FileTooLarge(meta.len()))?;
    let mod_time = meta
        .modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp().clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0);

    let mut file = File::open(&job.path).await.map_err(RendezvousError::LocalFile)?;
    let mut buf = vec![0u8; job.chunk_size.max(1)];
    let mut sum = OftChecksum::new();
    loop {
        let n = file.read(&mut buf).await.map_err(RendezvousError::LocalFile)?;
        if n == 0 {
            break;
        }
        sum.update(&buf[..n]);
    }
    file.rewind().await.map_err(RendezvousError::LocalFile)?;

    let prompt = OftHeader::prompt(job.cookie, &job.name, size, sum.value(), mod_time);
    write_header(&mut stream, &prompt).await?;
    debug!(cookie = %job.cookie, size, checksum = format!("{:08x}", prompt.checksum), "sent PROMPT");

    let ack = read_header(&mut stream).await?;
    expect_frame(&ack, OftFrameType::Ack)?;
    if ack.cookie != job.cookie {
        return Err(RendezvousError::Protocol(format!(
            "ACK carries cookie {} instead of {}",
            ack.cookie, job.cookie
        )));
    }
    reporter.pump(PumpReport::Established);

    let total = u64::from(size);
    let mut sent = 0u64;
    while sent < total {
        let want = buf.len().min((total - sent) as usize);
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(RendezvousError::LocalFile)?;
        if n == 0 {
            return Err(RendezvousError::LocalFile(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file shrank while sending",
            )));
        }
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
        reporter.pump(PumpReport::Progress(sent));
    }
    stream.flush().await?;

    let done = read_header(&mut stream).await?;
    expect_frame(&done, OftFrameType::Done)?;
    if done.received_checksum != prompt.checksum {
        debug!(
            cookie = %job.cookie,
            ours = format!("{:08x}", prompt.checksum),
            theirs = format!("{:08x}", done.received_checksum),
            "peer reports a different checksum"
        );
    }
    info!(cookie = %job.cookie, bytes = sent, "file sent");
    let _ = stream.shutdown().await;
    Ok(())
}

pub(crate) async fn receive_file(
    mut stream: PeerStream,
    job: ReceiveJob,
    reporter: Reporter,
) -> Result<(), RendezvousError> {
    let prompt = read_header(&mut stream).await?;
    expect_frame(&prompt, OftFrameType::Prompt)?;

    if let Some(parent) = job.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(RendezvousError::LocalFile)?;
    }
    let mut file = File::create(&job.path)
        .await
        .map_err(RendezvousError::LocalFile)?;

    let ack = prompt.ack(job.cookie);
    write_header(&mut stream, &ack).await?;
    debug!(cookie = %job.cookie, size = prompt.size, name = %prompt.name, "sent ACK");
    reporter.pump(PumpReport::Established);

    let total = u64::from(prompt.size);
    let mut buf = vec![0u8; job.chunk_size.max(1)];
    let mut sum = OftChecksum::new();
    let mut received = 0u64;
    while received < total {
        let want = buf.len().min((total - received) as usize);
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(RendezvousError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("peer closed after {received} of {total} bytes"),
            )));
        }
        sum.update(&buf[..n]);
        file.write_all(&buf[..n])
            .await
            .map_err(RendezvousError::LocalFile)?;
        received += n as u64;
        reporter.pump(PumpReport::Progress(received));
    }
    file.flush().await.map_err(RendezvousError::LocalFile)?;

    if sum.value() != prompt.checksum {
        debug!(
            cookie = %job.cookie,
            expected = format!("{:08x}", prompt.checksum),
            actual = format!("{:08x}", sum.value()),
            "checksum mismatch, keeping file"
        );
    }

    write_header(&mut stream, &ack.done(prompt.size, sum.value())).await?;
    info!(cookie = %job.cookie, bytes = received, path = %job.path.display(), "file received");
    let _ = stream.shutdown().await;
    Ok(())
}

fn expect_frame(header: &OftHeader, expected: OftFrameType) -> Result<(), RendezvousError> {
    match header.frame_type {
        t if t == expected => Ok(()),
        OftFrameType::Resume | OftFrameType::ResumeAccept | OftFrameType::ResumeAck => Err(
            RendezvousError::Unsupported("peer requested resume".into()),
        ),
        other => Err(RendezvousError::Protocol(format!(
            "expected {expected:?}, got {other:?}"
        ))),
    }
}
