pub(crate) const MAC_ADDR_LEN: u8 = 6;
pub(crate) const IP_V4_LEN: u8 = 4;
pub(crate) const ETH_HEADER_LEN: usize = 14;
pub(crate) const ARP_PACK_LEN: usize = 28;
pub(crate) const ETH_PACK_LEN: usize = ETH_HEADER_LEN + ARP_PACK_LEN;

/// Largest frame read from the link-layer socket in one call.
pub(crate) const MAX_FRAME_LEN: usize = 1514;

/// Target label carrying a pre-resolved hardware address.
pub const MAC_LABEL: &str = "mac";

pub const PROBE_TYPE: &str = "arping";
