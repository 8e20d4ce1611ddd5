use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 8-byte opaque correlation token chosen by the initiator of a rendezvous.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie(pub [u8; 8]);

impl Cookie {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({})", hex::encode(self.0))
    }
}

/// Rendezvous capabilities this engine understands. Voice, video and the
/// rest of the capability space are recognised by the envelope layer only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    SendFile,
    DirectIm,
}

impl Capability {
    /// `09461343-4C7F-11D1-8222-444553540000`
    pub const SEND_FILE_UUID: Uuid = Uuid::from_u128(0x09461343_4C7F_11D1_8222_444553540000);
    /// `09461345-4C7F-11D1-8222-444553540000`
    pub const DIRECT_IM_UUID: Uuid = Uuid::from_u128(0x09461345_4C7F_11D1_8222_444553540000);

    pub fn uuid(self) -> Uuid {
        match self {
            Self::SendFile => Self::SEND_FILE_UUID,
            Self::DirectIm => Self::DIRECT_IM_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if uuid == Self::SEND_FILE_UUID {
            Some(Self::SendFile)
        } else if uuid == Self::DIRECT_IM_UUID {
            Some(Self::DirectIm)
        } else {
            None
        }
    }
}

/// Direction of the payload, not of the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMethod {
    Direct,
    Redirect,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyStage {
    None,
    Stage1,
    Stage2,
    Stage3,
}

impl ProxyStage {
    /// Stage implied by the request number of a propose carrying the proxy flag.
    pub fn from_reqnum(reqnum: u16) -> Self {
        match reqnum {
            1 => Self::Stage1,
            2 => Self::Stage2,
            _ => Self::Stage3,
        }
    }

    /// Request number used when advertising a relay session at this stage.
    pub fn reqnum(self) -> u16 {
        match self {
            Self::None | Self::Stage1 => 1,
            Self::Stage2 => 2,
            Self::Stage3 => 3,
        }
    }
}

/// Connection candidates carried in a rendezvous propose.
///
/// `verified_ip` is the address the server observed for the peer; it is
/// stamped by the server, so outbound proposes leave it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHints {
    pub client_ip: Option<Ipv4Addr>,
    pub verified_ip: Option<Ipv4Addr>,
    pub proxy_ip: Option<Ipv4Addr>,
    pub port: u16,
    pub use_proxy: bool,
}

impl PeerHints {
    /// True when the server-observed address adds nothing over the
    /// self-declared one.
    pub fn verified_matches_client(&self) -> bool {
        match (self.client_ip, self.verified_ip) {
            (Some(client), Some(verified)) => client == verified,
            _ => false,
        }
    }
}

/// File description carried in a send-file propose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
}

/// Screen names compare case-insensitively and ignore spaces.
pub fn normalize_screen_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_uuid_roundtrip() {
        assert_eq!(
            Capability::SEND_FILE_UUID.to_string(),
            "09461343-4c7f-11d1-8222-444553540000"
        );
        assert_eq!(
            Capability::from_uuid(Capability::DirectIm.uuid()),
            Some(Capability::DirectIm)
        );
        assert_eq!(Capability::from_uuid(Uuid::nil()), None);
    }

    #[test]
    fn cookie_displays_as_hex() {
        let cookie = Cookie([0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3]);
        assert_eq!(cookie.to_string(), "deadbeef00010203");
    }

    #[test]
    fn stage_follows_reqnum() {
        assert_eq!(ProxyStage::from_reqnum(1), ProxyStage::Stage1);
        assert_eq!(ProxyStage::from_reqnum(2), ProxyStage::Stage2);
        assert_eq!(ProxyStage::from_reqnum(3), ProxyStage::Stage3);
        assert_eq!(ProxyStage::Stage2.reqnum(), 2);
    }

    #[test]
    fn verified_match_requires_both() {
        let ip = Ipv4Addr::new(192, 0, 2, 1);
        let mut hints = PeerHints { client_ip: Some(ip), ..Default::default() };
        assert!(!hints.verified_matches_client());
        hints.verified_ip = Some(ip);
        assert!(hints.verified_matches_client());
        hints.verified_ip = Some(Ipv4Addr::new(198, 51, 100, 9));
        assert!(!hints.verified_matches_client());
    }

    #[test]
    fn screen_names_normalize() {
        assert_eq!(normalize_screen_name("Some Buddy"), "somebuddy");
        assert_eq!(normalize_screen_name("somebuddy"), normalize_screen_name("SOME BUDDY"));
    }
}
