//! Static guest network configuration derived from the container's bridge
//! network assignment.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};

/// Address, netmask and gateway handed to the guest's `eth0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestNetwork {
    /// Guest address, identical to the container's bridge address
    pub address: Ipv4Addr,
    /// Netmask computed from the prefix length
    pub netmask: Ipv4Addr,
    /// Default gateway, if the network has one
    pub gateway: Option<Ipv4Addr>,
}

/// Compute the netmask for an IPv4 prefix length
pub fn netmask_for_prefix(prefix_len: u32) -> Result<Ipv4Addr> {
    if prefix_len > 32 {
        return Err(Error::InvalidNetworkConfig(format!(
            "prefix length {prefix_len} is out of range for IPv4"
        )));
    }
    let bits = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
    Ok(Ipv4Addr::from(bits))
}

/// Derive the guest's static network configuration from `address/prefix_len`.
///
/// An empty `gateway` means the network has none.
pub fn derive_static_config(address: &str, prefix_len: u32, gateway: &str) -> Result<GuestNetwork> {
    let cidr = format!("{address}/{prefix_len}");
    let address = match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4,
        Ok(IpAddr::V6(_)) => {
            return Err(Error::InvalidNetworkConfig(format!(
                "{cidr}: only IPv4 bridge networks are supported"
            )))
        }
        Err(_) => {
            return Err(Error::InvalidNetworkConfig(format!(
                "could not parse CIDR {cidr}"
            )))
        }
    };
    let netmask = netmask_for_prefix(prefix_len)
        .map_err(|_| Error::InvalidNetworkConfig(format!("could not parse CIDR {cidr}")))?;

    let gateway = match gateway.trim() {
        "" => None,
        gw => Some(gw.parse::<Ipv4Addr>().map_err(|_| {
            Error::InvalidNetworkConfig(format!("invalid gateway address {gw:?}"))
        })?),
    };

    Ok(GuestNetwork {
        address,
        netmask,
        gateway,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_masks() {
        let cases = [
            (0, "0.0.0.0"),
            (8, "255.0.0.0"),
            (16, "255.255.0.0"),
            (20, "255.255.240.0"),
            (24, "255.255.255.0"),
            (30, "255.255.255.252"),
            (32, "255.255.255.255"),
        ];
        for (prefix, expected) in cases {
            assert_eq!(
                netmask_for_prefix(prefix).unwrap().to_string(),
                expected,
                "/{prefix}"
            );
        }
    }

    #[test]
    fn test_mask_matches_prefix_bits() {
        for prefix in 0..=32u32 {
            let mask = u32::from(netmask_for_prefix(prefix).unwrap());
            assert_eq!(mask.count_ones(), prefix);
            assert_eq!(mask.leading_ones(), prefix);
        }
    }

    #[test]
    fn test_derive_bridge_network() {
        let net = derive_static_config("172.17.0.2", 16, "172.17.0.1").unwrap();
        assert_eq!(net.address, Ipv4Addr::new(172, 17, 0, 2));
        assert_eq!(net.netmask, Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(net.gateway, Some(Ipv4Addr::new(172, 17, 0, 1)));
    }

    #[test]
    fn test_no_gateway() {
        let net = derive_static_config("10.0.0.5", 24, "").unwrap();
        assert_eq!(net.gateway, None);
    }

    #[test]
    fn test_invalid_inputs() {
        for (addr, prefix, gw) in [
            ("", 16, "172.17.0.1"),
            ("172.17.0", 16, "172.17.0.1"),
            ("172.17.0.2", 33, "172.17.0.1"),
            ("fd00::2", 64, ""),
            ("172.17.0.2", 16, "gateway"),
        ] {
            let err = derive_static_config(addr, prefix, gw).unwrap_err();
            assert!(
                matches!(err, Error::InvalidNetworkConfig(_)),
                "{addr}/{prefix} via {gw}: {err}"
            );
        }
    }
}
