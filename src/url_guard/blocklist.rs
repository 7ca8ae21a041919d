//! Blocked IP ranges (spec §4.1, "Blocked IP ranges (authoritative)"):
//! SSRF defense-in-depth for the case a hostname resolves to an address the
//! syntactic check never saw directly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv4 `(network, prefix_len)` pairs, taken verbatim from spec §4.1.
const BLOCKED_V4: &[(Ipv4Addr, u32)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

fn v4_in_range(addr: Ipv4Addr, network: Ipv4Addr, prefix_len: u32) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
    (u32::from(addr) & mask) == (u32::from(network) & mask)
}

fn v6_in_range(addr: Ipv6Addr, network: Ipv6Addr, prefix_len: u32) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let mask = u128::MAX.checked_shl(128 - prefix_len).unwrap_or(0);
    (u128::from(addr) & mask) == (u128::from(network) & mask)
}

/// `::1`, `fc00::/7` (unique local), `fe80::/10` (link-local),
/// `ff00::/8` (multicast).
const BLOCKED_V6: &[(Ipv6Addr, u32)] = &[
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

/// True if `addr` falls in any blocked range, including IPv4-mapped IPv6
/// addresses of a blocked IPv4 range.
pub fn is_blocked_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => BLOCKED_V4
            .iter()
            .any(|&(net, len)| v4_in_range(*v4, net, len)),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return BLOCKED_V4
                    .iter()
                    .any(|&(net, len)| v4_in_range(mapped, net, len));
            }
            BLOCKED_V6.iter().any(|&(net, len)| v6_in_range(*v6, net, len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_private_v4_ranges() {
        assert!(is_blocked_address(&"10.1.2.3".parse().unwrap()));
        assert!(is_blocked_address(&"172.16.0.1".parse().unwrap()));
        assert!(is_blocked_address(&"192.168.1.1".parse().unwrap()));
        assert!(is_blocked_address(&"127.0.0.1".parse().unwrap()));
        assert!(is_blocked_address(&"169.254.169.254".parse().unwrap()));
        assert!(is_blocked_address(&"100.64.0.1".parse().unwrap()));
    }

    #[test]
    fn allows_public_v4() {
        assert!(!is_blocked_address(&"93.184.216.34".parse().unwrap()));
        assert!(!is_blocked_address(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn blocks_v6_ranges() {
        assert!(is_blocked_address(&"::1".parse().unwrap()));
        assert!(is_blocked_address(&"fe80::1".parse().unwrap()));
        assert!(is_blocked_address(&"fc00::1".parse().unwrap()));
    }

    #[test]
    fn blocks_v4_mapped_v6() {
        assert!(is_blocked_address(&"::ffff:10.0.0.1".parse().unwrap()));
    }
}
