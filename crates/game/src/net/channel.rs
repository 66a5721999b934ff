use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::{Packet, MAX_PACKET_SIZE};

/// Non-blocking datagram pipe: binds, frames [`Packet`]s, enforces the MTU
/// budget, and hands back one well-formed packet per poll. It carries no
/// connection state — sequencing, replay filtering and acknowledgements
/// all live in [`super::PacketLedger`], per link, where they belong.
pub struct UdpChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buf: Box<[u8]>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl UdpChannel {
    pub fn open<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            recv_buf: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "datagram over the MTU budget",
            ));
        }

        let sent = self.socket.send_to(&data, addr)?;
        self.bytes_sent += sent as u64;
        Ok(sent)
    }

    /// The next decodable datagram with a valid envelope, or `None` once
    /// the socket has nothing more to give. Garbage is skipped in place so
    /// a flood of junk cannot wedge the caller.
    pub fn poll(&mut self) -> io::Result<Option<(Packet, SocketAddr)>> {
        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((size, addr)) => {
                    self.bytes_received += size as u64;
                    match Packet::deserialize(&self.recv_buf[..size]) {
                        Ok(packet) if packet.header.is_valid() => {
                            return Ok(Some((packet, addr)))
                        }
                        Ok(_) => log::debug!("wrong magic or version from {addr}"),
                        Err(e) => log::debug!("undecodable datagram from {addr}: {e}"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}
