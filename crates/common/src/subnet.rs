//! IPv4 subnet helpers used by network configuration and the beacon.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use rand::Rng;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Parse a CIDR string (`10.0.0.0/16`), rejecting anything that is not a
/// well-formed IPv4 network.
pub fn parse_ipv4_cidr(cidr: &str) -> Result<Ipv4Network> {
    Ipv4Network::from_str(cidr)
        .map_err(|e| Error::InvalidConfig(format!("invalid IPv4 subnet {cidr:?}: {e}")))
}

/// Draw a uniformly random host address from `subnet`, excluding the network
/// and broadcast addresses for subnets wider than a /31.
pub fn random_ip(subnet: &Ipv4Network) -> Result<Ipv4Addr> {
    let network = u32::from(subnet.network());
    let broadcast = u32::from(subnet.broadcast());
    if broadcast <= network {
        return Err(Error::InvalidConfig(format!(
            "subnet {subnet} has no usable host addresses"
        )));
    }
    let (lo, hi) = if broadcast - network <= 1 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };
    let mut rng = rand::thread_rng();
    let addr = if lo == hi {
        lo
    } else {
        rng.gen_range(lo..=hi)
    };
    Ok(Ipv4Addr::from(addr))
}

/// The broadcast address the beacon sends UDP announcements to for the
/// subnet of `addr/prefix`.
pub fn broadcast_address(addr: Ipv4Addr, prefix: u8) -> Result<Ipv4Addr> {
    let network = Ipv4Network::new(addr, prefix)
        .map_err(|e| Error::InvalidConfig(format!("invalid prefix {prefix}: {e}")))?;
    Ok(network.broadcast())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ip_stays_inside_subnet() {
        let subnet = parse_ipv4_cidr("10.155.0.0/16").unwrap();
        for _ in 0..200 {
            let ip = random_ip(&subnet).unwrap();
            assert!(subnet.contains(ip), "{ip} not inside {subnet}");
            assert_ne!(ip, subnet.network());
            assert_ne!(ip, subnet.broadcast());
        }
    }

    #[test]
    fn non_ipv4_cidr_is_rejected() {
        assert!(parse_ipv4_cidr("not-a-cidr").is_err());
    }

    #[test]
    fn slash_thirty_one_has_two_usable_hosts() {
        let subnet = parse_ipv4_cidr("10.0.0.0/31").unwrap();
        let ip = random_ip(&subnet).unwrap();
        assert!(ip == subnet.network() || ip == subnet.broadcast());
    }

    #[test]
    fn broadcast_address_matches_prefix() {
        let addr = broadcast_address(Ipv4Addr::new(10, 155, 3, 7), 16).unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 155, 255, 255));
    }
}
