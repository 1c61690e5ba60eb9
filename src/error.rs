use std::net::{IpAddr, Ipv4Addr};

use thiserror::Error as ThisError;

pub type OpaqueError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Response timeout")]
    ResponseTimeout,
    #[error("cycle deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid hardware address {value:?}: {reason}")]
    InvalidHardwareAddr { value: String, reason: String },
    #[error("unsupported address {0}, only IPv4 targets can be resolved")]
    UnsupportedAddress(IpAddr),
    #[error("no usable interface found for {0}")]
    NoUsableInterface(Ipv4Addr),
    #[error("iface: '{iface}' can't reach ip: '{ip}'")]
    NoAddressInNetwork { iface: String, ip: Ipv4Addr },
    #[error("interface {0} does not have a hardware address")]
    MissingHardwareAddr(String),
    #[error("transport error on {iface}: {reason}")]
    Transport { iface: String, reason: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Opaque(#[from] OpaqueError),
}
pub type Result<T> = std::result::Result<T, Error>;
