//! Construction and matching of ARP request/reply frames.
//!
//! Everything here is pure: frames are built into and parsed from byte
//! buffers, so the matching rules can be exercised without a socket.

use pnet::packet::arp::{
    Arp, ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket,
};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{FromPacket, Packet};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

use crate::constants::{ARP_PACK_LEN, ETH_PACK_LEN, IP_V4_LEN, MAC_ADDR_LEN};
use crate::error::{Error, Result};

/// Hardware address a request is aimed at.
///
/// `Broadcast` is used when the target's hardware address is not known up
/// front, which is the normal case: discovering it is the point of the request.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum TargetMac {
    #[default]
    Broadcast,
    Known(MacAddr),
}

impl TargetMac {
    pub fn addr(&self) -> MacAddr {
        match self {
            TargetMac::Broadcast => MacAddr::broadcast(),
            TargetMac::Known(mac) => *mac,
        }
    }
}

/// An outstanding ARP request.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Request {
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: TargetMac,
    pub target_ip: Ipv4Addr,
}

/// Builds a request asking who owns `target_ip`, answered to `sender_mac`/`sender_ip`.
pub fn build_request(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: TargetMac,
    target_ip: Ipv4Addr,
) -> Request {
    Request {
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    }
}

impl Request {
    /// Encodes the request as a complete Ethernet frame.
    pub fn encode(&self) -> Result<[u8; ETH_PACK_LEN]> {
        let mut eth_buf = [0; ETH_PACK_LEN];
        let mut arp_buf = [0; ARP_PACK_LEN];

        let mut arp_packet = MutableArpPacket::new(&mut arp_buf)
            .ok_or(Error::Opaque("failed to create ARP packet".into()))?;
        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(MAC_ADDR_LEN);
        arp_packet.set_proto_addr_len(IP_V4_LEN);
        arp_packet.set_operation(ArpOperations::Request);
        arp_packet.set_sender_hw_addr(self.sender_mac);
        arp_packet.set_sender_proto_addr(self.sender_ip);
        arp_packet.set_target_hw_addr(self.target_mac.addr());
        arp_packet.set_target_proto_addr(self.target_ip);

        let mut eth_packet = MutableEthernetPacket::new(&mut eth_buf)
            .ok_or(Error::Opaque("failed to create Ethernet frame".into()))?;
        eth_packet.set_destination(self.target_mac.addr());
        eth_packet.set_source(self.sender_mac);
        eth_packet.set_ethertype(EtherTypes::Arp);
        eth_packet.set_payload(arp_packet.packet());

        Ok(eth_buf)
    }
}

/// Address pairs carried by a received ARP frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Reply {
    pub operation: ArpOperation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl From<Arp> for Reply {
    fn from(arp: Arp) -> Self {
        Self {
            operation: arp.operation,
            sender_mac: arp.sender_hw_addr,
            sender_ip: arp.sender_proto_addr,
            target_mac: arp.target_hw_addr,
            target_ip: arp.target_proto_addr,
        }
    }
}

impl Reply {
    /// See [`is_response_of`].
    pub fn is_response_of(&self, request: &Request) -> bool {
        is_response_of(self, request)
    }
}

/// Classic ARP matching: the reply comes from the address we asked about and
/// is addressed to the address we asked from. Hardware addresses are not
/// compared, the sender's is what is being discovered.
pub fn is_response_of(reply: &Reply, request: &Request) -> bool {
    reply.sender_ip == request.target_ip && reply.target_ip == request.sender_ip
}

/// Parses an Ethernet frame carrying an IPv4-over-Ethernet ARP packet.
pub fn parse_frame(bytes: &[u8]) -> Result<Reply> {
    let ethernet_packet =
        EthernetPacket::new(bytes).ok_or(Error::Opaque("failed to parse Ethernet frame".into()))?;
    if ethernet_packet.get_ethertype() != EtherTypes::Arp {
        return Err(Error::Opaque("not an ARP packet".into()));
    }
    let arp = ArpPacket::new(ethernet_packet.payload())
        .ok_or(Error::Opaque("failed to parse ARP packet".into()))?
        .from_packet();
    if arp.protocol_type != EtherTypes::Ipv4 {
        return Err(Error::Opaque("not an IPv4 ARP packet".into()));
    }
    Ok(arp.into())
}
