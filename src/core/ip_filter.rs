//! Admission gate: source IP allow/block at accept time.
//!
//! Rejected sockets are reset (`SO_LINGER` 0) so nothing is relayed and no
//! FIN/TIME_WAIT state is left behind.

use std::net::IpAddr;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

use super::access::{AccessLists, AccessPolicy};

/// Canonical text form used for list lookups
///
/// IPv4-mapped IPv6 peers (from a dual-stack listener) are matched by their
/// IPv4 form so lists only need the dotted notation.
pub fn canonical_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Whether a peer IP may proceed to protocol interception
pub fn admit(policy: &AccessPolicy, lists: &AccessLists, ip: IpAddr) -> bool {
    if !policy.is_enabled() {
        return true;
    }
    policy.permits(lists, &canonical_ip(ip))
}

/// Close with a hard reset instead of a graceful FIN
pub fn reset(stream: TcpStream) {
    let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
    drop(stream);
}
