use afpacket::tokio::{FilterProgram, RawPacketStream};
use log::debug;
use pnet::util::MacAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::arp::{parse_frame, Reply, Request};
use crate::constants::MAX_FRAME_LEN;
use crate::error::{Error, Result};

const BPF_LD_H_ABS: u16 = 0x28;
const BPF_JMP_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;
const ETHERTYPE_OFFSET: u32 = 12;
const ETHERTYPE_ARP: u32 = 0x0806;

/// Accepts ARP frames only:
/// `ldh [12]; jeq #0x806, 0, 1; ret #65535; ret #0`.
fn arp_only_filter() -> FilterProgram {
    vec![
        (BPF_LD_H_ABS, 0, 0, ETHERTYPE_OFFSET),
        (BPF_JMP_JEQ_K, 0, 1, ETHERTYPE_ARP),
        (BPF_RET_K, 0, 0, 0xffff),
        (BPF_RET_K, 0, 0, 0),
    ]
}

/// A raw link-layer socket bound to one interface, used for a single probe attempt.
///
/// The underlying descriptor is released when the socket is dropped, so every
/// exit path of the owner (including cancellation of its future) closes it.
#[derive(Debug)]
pub struct ArpSocket {
    iface: String,
    stream: RawPacketStream,
}

impl ArpSocket {
    /// Opens a raw packet stream and binds it to `interface_name`.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be created (usually missing
    /// `CAP_NET_RAW`) or the interface does not exist.
    pub fn open(interface_name: &str) -> Result<Self> {
        let mut stream = RawPacketStream::new().map_err(|err| Error::Transport {
            iface: interface_name.to_string(),
            reason: format!("failed to create packet stream, reason: {}", err),
        })?;
        stream.bind(interface_name).map_err(|err| Error::Transport {
            iface: interface_name.to_string(),
            reason: format!("failed to bind interface to stream, reason {}", err),
        })?;
        stream
            .set_bpf_filter(arp_only_filter())
            .map_err(|err| Error::Transport {
                iface: interface_name.to_string(),
                reason: format!("failed to attach ARP filter, reason: {}", err),
            })?;
        // frames from any interface may have queued up before bind and filter
        stream.drain();
        debug!("Opened link-layer socket on {}", interface_name);
        Ok(Self {
            iface: interface_name.to_string(),
            stream,
        })
    }

    /// Writes the request frame once and returns the number of bytes written.
    pub async fn send(&mut self, request: &Request) -> Result<usize> {
        let frame = request.encode()?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|err| Error::Transport {
                iface: self.iface.clone(),
                reason: format!("failed to send request, reason: {}", err),
            })?;
        Ok(frame.len())
    }

    /// Waits for the next ARP frame seen on the interface.
    ///
    /// The kernel only delivers ARP frames; anything else that slips through is
    /// skipped. Returns the parsed packet and the
    /// Ethernet source address it arrived from, or [`Error::ResponseTimeout`]
    /// once `deadline` passes.
    pub async fn receive(&mut self, deadline: Instant) -> Result<(Reply, MacAddr)> {
        let mut buf = [0; MAX_FRAME_LEN];
        loop {
            let read_bytes = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .map_err(|_| Error::ResponseTimeout)?
                .map_err(|err| Error::Transport {
                    iface: self.iface.clone(),
                    reason: format!("failed to read frame, reason: {}", err),
                })?;
            if read_bytes == 0 {
                return Err(Error::Transport {
                    iface: self.iface.clone(),
                    reason: "packet stream closed".into(),
                });
            }
            let frame = &buf[..read_bytes];
            if let Ok(reply) = parse_frame(frame) {
                return Ok((reply, source_of(frame)));
            }
        }
    }

    /// Releases the socket. Equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for ArpSocket {
    fn drop(&mut self) {
        debug!("Closed link-layer socket on {}", self.iface);
    }
}

fn source_of(frame: &[u8]) -> MacAddr {
    MacAddr::new(frame[6], frame[7], frame[8], frame[9], frame[10], frame[11])
}
