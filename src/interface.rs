//! Choice of the local interface an ARP request for a destination goes out of.
//!
//! Interfaces are considered in the order the platform enumerates them and the
//! first operational one with a subnet containing the destination wins. No
//! priority is applied; overlapping subnets on several interfaces resolve to
//! whichever the OS lists first.

use ipnet::Ipv4Net;
use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};

/// Snapshot of a local interface, reduced to what selection needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub mac: Option<MacAddr>,
    pub up: bool,
    pub networks: Vec<Ipv4Net>,
}

impl From<&NetworkInterface> for LocalInterface {
    fn from(iface: &NetworkInterface) -> Self {
        let networks = iface
            .ips
            .iter()
            .filter_map(|net| match net.ip() {
                IpAddr::V4(ipv4) => Ipv4Net::new(ipv4, net.prefix()).ok(),
                IpAddr::V6(_) => None,
            })
            .collect();
        Self {
            name: iface.name.clone(),
            mac: iface.mac,
            up: iface.is_up(),
            networks,
        }
    }
}

impl LocalInterface {
    /// Returns the local address whose subnet contains `dst_ip`.
    pub fn address_in_network_of(&self, dst_ip: Ipv4Addr) -> Result<Ipv4Addr> {
        self.networks
            .iter()
            .find(|net| net.contains(&dst_ip))
            .map(|net| net.addr())
            .ok_or_else(|| Error::NoAddressInNetwork {
                iface: self.name.clone(),
                ip: dst_ip,
            })
    }
}

/// An interface picked for a destination together with the source addresses to use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selected {
    pub interface: LocalInterface,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

/// Lists the host's interfaces.
pub fn local_interfaces() -> Vec<LocalInterface> {
    datalink::interfaces().iter().map(LocalInterface::from).collect()
}

/// Selects among the host's interfaces, see [`select_from`].
pub fn select(dst_ip: Ipv4Addr) -> Result<Selected> {
    select_from(&local_interfaces(), dst_ip)
}

/// Picks the first interface that is up and has a subnet containing `dst_ip`.
pub fn select_from(interfaces: &[LocalInterface], dst_ip: Ipv4Addr) -> Result<Selected> {
    for iface in interfaces {
        if !iface.up {
            continue;
        }
        let Ok(ip) = iface.address_in_network_of(dst_ip) else {
            continue;
        };
        let mac = iface
            .mac
            .ok_or_else(|| Error::MissingHardwareAddr(iface.name.clone()))?;
        return Ok(Selected {
            interface: iface.clone(),
            mac,
            ip,
        });
    }
    Err(Error::NoUsableInterface(dst_ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, up: bool, nets: &[&str]) -> LocalInterface {
        LocalInterface {
            name: name.to_string(),
            mac: Some(MacAddr::new(0x02, 0, 0, 0, 0, name.len() as u8)),
            up,
            networks: nets.iter().map(|n| n.parse().unwrap()).collect(),
        }
    }

    #[test]
    fn test_selects_interface_with_matching_subnet() {
        let ifaces = [
            iface("lo", true, &["127.0.0.1/8"]),
            iface("eth0", true, &["192.168.1.10/24", "10.1.1.5/25"]),
        ];
        let selected = select_from(&ifaces, Ipv4Addr::new(10, 1, 1, 100)).unwrap();
        assert_eq!(selected.interface.name, "eth0");
        assert_eq!(selected.ip, Ipv4Addr::new(10, 1, 1, 5));
        assert_eq!(selected.mac, ifaces[1].mac.unwrap());
    }

    #[test]
    fn test_skips_down_interface() {
        let ifaces = [
            iface("eth0", false, &["10.1.1.5/24"]),
            iface("eth1", true, &["10.1.1.6/24"]),
        ];
        let selected = select_from(&ifaces, Ipv4Addr::new(10, 1, 1, 1)).unwrap();
        assert_eq!(selected.interface.name, "eth1");
        assert_eq!(selected.ip, Ipv4Addr::new(10, 1, 1, 6));
    }

    #[test]
    fn test_first_enumerated_wins() {
        let ifaces = [
            iface("eth0", true, &["10.1.0.1/16"]),
            iface("eth1", true, &["10.1.1.1/24"]),
        ];
        let selected = select_from(&ifaces, Ipv4Addr::new(10, 1, 1, 9)).unwrap();
        assert_eq!(selected.interface.name, "eth0");
    }

    #[test]
    fn test_no_usable_interface() {
        let ifaces = [
            iface("eth0", false, &["10.1.1.5/24"]),
            iface("eth1", true, &["192.168.0.1/24"]),
        ];
        let err = select_from(&ifaces, Ipv4Addr::new(10, 1, 1, 1)).unwrap_err();
        assert!(matches!(err, Error::NoUsableInterface(ip) if ip == Ipv4Addr::new(10, 1, 1, 1)));
        assert!(select_from(&[], Ipv4Addr::new(10, 1, 1, 1)).is_err());
    }

    #[test]
    fn test_missing_hardware_address() {
        let mut tun = iface("tun0", true, &["10.8.0.2/24"]);
        tun.mac = None;
        let err = select_from(&[tun], Ipv4Addr::new(10, 8, 0, 1)).unwrap_err();
        assert!(matches!(err, Error::MissingHardwareAddr(name) if name == "tun0"));
    }

    #[test]
    fn test_address_in_network_of() {
        let eth = iface("eth0", true, &["10.1.1.5/24"]);
        assert!(eth.address_in_network_of(Ipv4Addr::new(10, 2, 1, 1)).is_err());
    }
}
