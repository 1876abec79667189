//! UDP-backed [`Mac`] for running the protocol stack without real radio
//! hardware: a tuned, non-blocking socket built once at bind time. Kept
//! synchronous — the CLI drives everything from one tick loop, so `recv`
//! is a single non-blocking poll rather than an async task.
//!
//! There is no physical broadcast domain over plain UDP, so every outbound
//! frame — broadcast or unicast alike — is sent to every configured peer
//! address. The frame's own TID addressing (§4.4) and the receive path's
//! routing check do the actual filtering, the same way a real radio's
//! shared channel would.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};

use umesh_core::mac::{Mac, MacRecv, MacStatistics, PacketInfo};

/// Socket receive/send buffer size requested at bind time.
const SOCKET_BUFFER_BYTES: usize = 256 * 1024;

/// A [`Mac`] implementation backed by a UDP socket.
pub struct UdpMac {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    rx_bytes: AtomicU32,
    rx_packets: AtomicU32,
    tx_bytes: AtomicU32,
    tx_packets: AtomicU32,
}

impl UdpMac {
    /// Bind `listen_addr` and configure the fixed set of peer addresses
    /// every send fans out to.
    pub fn bind(listen_addr: SocketAddr, peers: Vec<SocketAddr>) -> std::io::Result<Self> {
        let domain = socket2::Domain::for_address(listen_addr);
        let sock = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
        // Best-effort buffer tuning; unsupported platforms just keep the
        // OS default, which is fine for frames this small (≤140 bytes).
        let _ = sock.set_recv_buffer_size(SOCKET_BUFFER_BYTES);
        let _ = sock.set_send_buffer_size(SOCKET_BUFFER_BYTES);
        sock.bind(&listen_addr.into())?;
        sock.set_nonblocking(true)?;

        Ok(Self {
            socket: sock.into(),
            peers,
            rx_bytes: AtomicU32::new(0),
            rx_packets: AtomicU32::new(0),
            tx_bytes: AtomicU32::new(0),
            tx_packets: AtomicU32::new(0),
        })
    }

    /// Local address actually bound (useful when `listen_addr` used port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Mac for UdpMac {
    fn recv(&mut self) -> MacRecv {
        let mut buf = [0u8; umesh_core::frame::SANDBOX_BUFFER_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _from)) => {
                self.rx_bytes.fetch_add(len as u32, Ordering::Relaxed);
                self.rx_packets.fetch_add(1, Ordering::Relaxed);
                MacRecv::Frame(buf[..len].to_vec(), PacketInfo::default())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => MacRecv::NotReady,
            Err(_) => MacRecv::NotReady,
        }
    }

    fn send(&mut self, frame: &[u8]) -> bool {
        if self.peers.is_empty() {
            return true;
        }
        let mut all_ok = true;
        for peer in &self.peers {
            match self.socket.send_to(frame, peer) {
                Ok(_) => {
                    self.tx_bytes.fetch_add(frame.len() as u32, Ordering::Relaxed);
                    self.tx_packets.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => all_ok = false,
                Err(_) => all_ok = false,
            }
        }
        all_ok
    }

    fn statistics(&self) -> Option<MacStatistics> {
        Some(MacStatistics {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            ..MacStatistics::default()
        })
    }
}
