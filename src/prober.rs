use log::{debug, error};
use pnet::util::MacAddr;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;

use crate::arp::{build_request, TargetMac};
use crate::constants::MAC_LABEL;
use crate::error::{Error, Result};
use crate::interface::{self, LocalInterface};
use crate::target::Target;
use crate::transport::ArpSocket;

/// Runs one reachability attempt against one target.
///
/// Implementations must return by `deadline`; the scheduler relies on it to
/// bound a cycle.
pub trait TargetProber: Send + Sync + 'static {
    fn probe(
        &self,
        target: &Target,
        deadline: Instant,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Reads the pre-resolved hardware address of `target`, if any.
///
/// Targets without one are asked for by broadcast.
pub fn destination_mac(target: &Target) -> Result<TargetMac> {
    match target.label(MAC_LABEL) {
        None => Ok(TargetMac::Broadcast),
        Some(value) => value
            .parse::<MacAddr>()
            .map(TargetMac::Known)
            .map_err(|err| Error::InvalidHardwareAddr {
                value: value.into(),
                reason: format!("{:?}", err),
            }),
    }
}

fn destination_ip(target: &Target) -> Result<Ipv4Addr> {
    match target.ip {
        IpAddr::V4(ip) => Ok(ip),
        ip => Err(Error::UnsupportedAddress(ip)),
    }
}

/// Probes a target with a single ARP request sent out of the interface facing it.
#[derive(Debug, Clone)]
pub struct ArpProber {
    receive_timeout: Duration,
    interfaces: fn() -> Vec<LocalInterface>,
}

impl ArpProber {
    pub fn new(receive_timeout: Duration) -> Self {
        Self {
            receive_timeout,
            interfaces: interface::local_interfaces,
        }
    }

    /// Replaces the interface enumeration, mostly useful to pin the choice in tests.
    pub fn with_interfaces(mut self, interfaces: fn() -> Vec<LocalInterface>) -> Self {
        self.interfaces = interfaces;
        self
    }

    async fn attempt(&self, target: &Target, deadline: Instant) -> Result<()> {
        let dst_ip = destination_ip(target)?;
        let dst_mac = destination_mac(target)?;
        let interfaces = tokio::task::spawn_blocking(self.interfaces)
            .await
            .map_err(|err| Error::Opaque(err.into()))?;
        let selected = interface::select_from(&interfaces, dst_ip)?;
        let request = build_request(selected.mac, selected.ip, dst_mac, dst_ip);

        let mut sock = ArpSocket::open(&selected.interface.name)?;
        let written = sock.send(&request).await?;
        debug!(
            "Sent {} byte request for {} on {}",
            written, dst_ip, selected.interface.name
        );

        let reply_deadline = Instant::now() + self.receive_timeout;
        let wait_until = reply_deadline.min(deadline);
        let result = loop {
            match sock.receive(wait_until).await {
                Ok((reply, source)) if reply.is_response_of(&request) => {
                    debug!(
                        "Got reply for {} {} from {}",
                        target.name, target.ip, source
                    );
                    break Ok(());
                }
                Ok((reply, source)) => {
                    debug!(
                        "Ignoring ARP {:?} {} -> {} from {}",
                        reply.operation, reply.sender_ip, reply.target_ip, source
                    );
                }
                Err(Error::ResponseTimeout) if deadline < reply_deadline => {
                    break Err(Error::DeadlineExceeded)
                }
                Err(err) => break Err(err),
            }
        };
        sock.close();
        result
    }
}

impl TargetProber for ArpProber {
    fn probe(
        &self,
        target: &Target,
        deadline: Instant,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            debug!("Checking target {} {}", target.name, target.ip);
            let result = self.attempt(target, deadline).await;
            if let Err(err) = &result {
                match err {
                    Error::ResponseTimeout | Error::DeadlineExceeded => debug!(
                        "Did not get reply for {} {}: {}",
                        target.name, target.ip, err
                    ),
                    _ => error!(
                        "Failed to probe target {} {}: {}",
                        target.name, target.ip, err
                    ),
                }
            }
            result
        }
    }
}
