use thiserror::Error;

use oscar_oft::OftError;
use oscar_proxy::{ProxyError, RelayErrorCode};
use oscar_types::FailureReason;

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("local file error: {0}")]
    LocalFile(std::io::Error),
    #[error("oft framing: {0}")]
    Oft(#[from] OftError),
    #[error("relay: {0}")]
    Proxy(#[from] ProxyError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("file of {0} bytes is too large for OFT")]
    FileTooLarge(u64),
    #[error("rendezvous session has shut down")]
    SessionClosed,
}

impl RendezvousError {
    /// Relay error code, when this is a relay login rejection.
    pub fn relay_rejection(&self) -> Option<RelayErrorCode> {
        match self {
            Self::Proxy(ProxyError::Rejected(code)) => Some(*code),
            _ => None,
        }
    }

    /// Failure on this side of the connection; another route would not help.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalFile(_) | Self::FileTooLarge(_))
    }

    /// Whether a stream that failed with this error before its handshake
    /// completed should fall through to the next connection method.
    pub fn retry_elsewhere(&self) -> bool {
        !self.is_local() && !matches!(self, Self::Unsupported(_))
    }

    /// User-facing reason for an error that ended a live stream.
    pub fn stream_failure(&self) -> FailureReason {
        match self {
            Self::LocalFile(e) => FailureReason::LocalIo(e.to_string()),
            Self::FileTooLarge(_) => FailureReason::LocalIo(self.to_string()),
            other => FailureReason::ConnectionLost(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_not_connection_losses() {
        let local = RendezvousError::LocalFile(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(local.is_local());
        assert!(matches!(local.stream_failure(), FailureReason::LocalIo(_)));

        let violation = RendezvousError::Protocol("bad cookie".into());
        assert!(!violation.is_local());
        assert!(violation.retry_elsewhere());
        assert!(!local.retry_elsewhere());
        assert!(!RendezvousError::Unsupported("resume".into()).retry_elsewhere());
        assert!(matches!(violation.stream_failure(), FailureReason::ConnectionLost(_)));
        assert!(!RendezvousError::Oft(OftError::UnknownFrameType(0x0bad)).is_local());
    }
}
