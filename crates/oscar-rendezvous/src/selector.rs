//! Connection-method selection and escalation.
//!
//! Pure functions over `Step` so the whole ladder can be checked without any
//! sockets. The session decides *when* to escalate (attempt failure or timer
//! expiry); this module decides *to what*.

use std::net::Ipv4Addr;
use std::time::Duration;

use oscar_types::{ConnectionMethod, PeerHints, ProxyStage};

use crate::config::TimeoutPolicy;

/// Which relay login a proxy step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRole {
    /// `INIT_SEND`: open a fresh relay session and advertise it to the peer.
    Create,
    /// `INIT_RECV`: enter the session the peer advertised.
    Join,
}

/// One connection strategy for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sender listens and proposes its own address.
    Listen,
    DirectClientIp,
    DirectVerifiedIp,
    /// Receiver listens and asks the sender to connect (reqnum 2).
    RedirectWait,
    /// Sender connects to the address from the receiver's redirect.
    RedirectClientIp,
    RedirectVerifiedIp,
    Proxy { stage: ProxyStage, login: LoginRole },
}

impl Step {
    pub fn method(self) -> ConnectionMethod {
        match self {
            Self::Listen | Self::DirectClientIp | Self::DirectVerifiedIp => ConnectionMethod::Direct,
            Self::RedirectWait | Self::RedirectClientIp | Self::RedirectVerifiedIp => {
                ConnectionMethod::Redirect
            }
            Self::Proxy { .. } => ConnectionMethod::Proxy,
        }
    }

    pub fn stage(self) -> ProxyStage {
        match self {
            Self::Proxy { stage, .. } => stage,
            _ => ProxyStage::None,
        }
    }

    pub fn timeout(self, policy: &TimeoutPolicy) -> Duration {
        match self {
            Self::DirectClientIp | Self::RedirectClientIp => policy.client_ip,
            Self::DirectVerifiedIp | Self::RedirectVerifiedIp => policy.verified_ip,
            Self::RedirectWait => policy.redirect_wait,
            Self::Listen | Self::Proxy { .. } => policy.proxy,
        }
    }

    /// Address an outbound step connects to, taken from the peer's hints.
    pub fn target(self, hints: &PeerHints) -> Option<(Ipv4Addr, u16)> {
        let ip = match self {
            Self::DirectClientIp | Self::RedirectClientIp => hints.client_ip,
            Self::DirectVerifiedIp | Self::RedirectVerifiedIp => hints.verified_ip,
            Self::Proxy {
                login: LoginRole::Join,
                ..
            } => hints.proxy_ip,
            _ => None,
        }?;
        Some((ip, hints.port))
    }
}

/// First step for a transfer we initiated.
pub fn initial_send_step(always_use_proxy: bool) -> Step {
    if always_use_proxy {
        Step::Proxy {
            stage: ProxyStage::Stage1,
            login: LoginRole::Create,
        }
    } else {
        Step::Listen
    }
}

/// First step after the local user accepts an inbound propose.
pub fn initial_receive_step(reqnum: u16, hints: &PeerHints) -> Step {
    if hints.use_proxy {
        return Step::Proxy {
            stage: ProxyStage::from_reqnum(reqnum),
            login: LoginRole::Join,
        };
    }
    if hints.client_ip.is_some() {
        Step::DirectClientIp
    } else if hints.verified_ip.is_some() {
        Step::DirectVerifiedIp
    } else {
        Step::RedirectWait
    }
}

/// Step taken when the peer re-proposes an existing cookie (reqnum 2 or 3).
pub fn redirect_step(reqnum: u16, hints: &PeerHints) -> Step {
    if hints.use_proxy {
        return Step::Proxy {
            stage: ProxyStage::from_reqnum(reqnum),
            login: LoginRole::Join,
        };
    }
    if hints.client_ip.is_some() {
        Step::RedirectClientIp
    } else if hints.verified_ip.is_some() {
        Step::RedirectVerifiedIp
    } else {
        Step::Proxy {
            stage: ProxyStage::Stage3,
            login: LoginRole::Create,
        }
    }
}

/// Step that follows a failed or timed-out `current`. `None` means the
/// ladder is exhausted and the transfer fails.
pub fn next_step(current: Step, hints: &PeerHints) -> Option<Step> {
    const STAGE3: Step = Step::Proxy {
        stage: ProxyStage::Stage3,
        login: LoginRole::Create,
    };

    let verified_differs = hints.verified_ip.is_some() && !hints.verified_matches_client();
    match current {
        Step::Listen => None,
        Step::DirectClientIp if verified_differs => Some(Step::DirectVerifiedIp),
        Step::DirectClientIp if hints.verified_matches_client() => Some(STAGE3),
        Step::DirectClientIp => Some(Step::RedirectWait),
        Step::DirectVerifiedIp => Some(Step::RedirectWait),
        Step::RedirectWait => Some(STAGE3),
        Step::RedirectClientIp if verified_differs => Some(Step::RedirectVerifiedIp),
        Step::RedirectClientIp | Step::RedirectVerifiedIp => Some(STAGE3),
        Step::Proxy {
            stage: ProxyStage::Stage1,
            login: LoginRole::Join,
        } => Some(Step::Proxy {
            stage: ProxyStage::Stage2,
            login: LoginRole::Create,
        }),
        Step::Proxy {
            stage: ProxyStage::Stage1 | ProxyStage::Stage2,
            ..
        } => Some(STAGE3),
        Step::Proxy { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const VERIFIED: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

    fn hints(client: Option<Ipv4Addr>, verified: Option<Ipv4Addr>) -> PeerHints {
        PeerHints {
            client_ip: client,
            verified_ip: verified,
            proxy_ip: None,
            port: 5190,
            use_proxy: false,
        }
    }

    fn ladder(start: Step, hints: &PeerHints) -> Vec<Step> {
        let mut steps = vec![start];
        while let Some(next) = next_step(*steps.last().unwrap(), hints) {
            steps.push(next);
        }
        steps
    }

    fn proxy(stage: ProxyStage, login: LoginRole) -> Step {
        Step::Proxy { stage, login }
    }

    #[test]
    fn receiver_full_ladder() {
        let h = hints(Some(CLIENT), Some(VERIFIED));
        let start = initial_receive_step(1, &h);
        assert_eq!(
            ladder(start, &h),
            vec![
                Step::DirectClientIp,
                Step::DirectVerifiedIp,
                Step::RedirectWait,
                proxy(ProxyStage::Stage3, LoginRole::Create),
            ]
        );
    }

    #[test]
    fn matching_verified_ip_skips_to_stage3() {
        let h = hints(Some(CLIENT), Some(CLIENT));
        assert_eq!(
            ladder(Step::DirectClientIp, &h),
            vec![
                Step::DirectClientIp,
                proxy(ProxyStage::Stage3, LoginRole::Create),
            ]
        );
    }

    #[test]
    fn missing_addresses_fall_back_to_redirect() {
        let h = hints(None, None);
        assert_eq!(initial_receive_step(1, &h), Step::RedirectWait);

        let h = hints(None, Some(VERIFIED));
        assert_eq!(initial_receive_step(1, &h), Step::DirectVerifiedIp);
        assert_eq!(next_step(Step::DirectVerifiedIp, &h), Some(Step::RedirectWait));
    }

    #[test]
    fn proxy_flag_joins_advertised_stage() {
        let mut h = hints(None, None);
        h.use_proxy = true;
        h.proxy_ip = Some(VERIFIED);
        assert_eq!(
            initial_receive_step(1, &h),
            proxy(ProxyStage::Stage1, LoginRole::Join)
        );
        assert_eq!(
            redirect_step(3, &h),
            proxy(ProxyStage::Stage3, LoginRole::Join)
        );
        assert_eq!(
            proxy(ProxyStage::Stage1, LoginRole::Join).target(&h),
            Some((VERIFIED, 5190))
        );
    }

    #[test]
    fn stage1_join_failure_creates_stage2() {
        let h = hints(None, None);
        assert_eq!(
            ladder(proxy(ProxyStage::Stage1, LoginRole::Join), &h),
            vec![
                proxy(ProxyStage::Stage1, LoginRole::Join),
                proxy(ProxyStage::Stage2, LoginRole::Create),
                proxy(ProxyStage::Stage3, LoginRole::Create),
            ]
        );
    }

    #[test]
    fn sender_ladders_terminate() {
        let h = hints(Some(CLIENT), Some(VERIFIED));
        assert_eq!(ladder(initial_send_step(false), &h), vec![Step::Listen]);
        assert_eq!(
            ladder(initial_send_step(true), &h),
            vec![
                proxy(ProxyStage::Stage1, LoginRole::Create),
                proxy(ProxyStage::Stage3, LoginRole::Create),
            ]
        );
    }

    #[test]
    fn redirect_from_receiver() {
        let h = hints(Some(CLIENT), Some(VERIFIED));
        assert_eq!(redirect_step(2, &h), Step::RedirectClientIp);
        assert_eq!(
            ladder(Step::RedirectClientIp, &h),
            vec![
                Step::RedirectClientIp,
                Step::RedirectVerifiedIp,
                proxy(ProxyStage::Stage3, LoginRole::Create),
            ]
        );
        assert_eq!(
            redirect_step(2, &hints(None, None)),
            proxy(ProxyStage::Stage3, LoginRole::Create)
        );
    }

    #[test]
    fn timeouts_follow_policy() {
        let policy = TimeoutPolicy::default();
        assert_eq!(Step::DirectClientIp.timeout(&policy), Duration::from_secs(1));
        assert_eq!(Step::RedirectVerifiedIp.timeout(&policy), Duration::from_secs(5));
        assert_eq!(Step::RedirectWait.timeout(&policy), Duration::from_secs(10));
        assert_eq!(
            proxy(ProxyStage::Stage2, LoginRole::Create).timeout(&policy),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn methods_and_stages() {
        assert_eq!(Step::Listen.method(), ConnectionMethod::Direct);
        assert_eq!(Step::RedirectWait.method(), ConnectionMethod::Redirect);
        let p = proxy(ProxyStage::Stage2, LoginRole::Join);
        assert_eq!(p.method(), ConnectionMethod::Proxy);
        assert_eq!(p.stage(), ProxyStage::Stage2);
        assert_eq!(Step::DirectClientIp.stage(), ProxyStage::None);
    }
}
