//! Viewer-side connection to a stream server.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::control::ControlCommand;
use crate::protocol::{self, Packet, PayloadEncoding, ProtocolError};

/// Receives data packets and sends control commands over one connection.
pub struct StreamReceiver {
    stream: TcpStream,
    peer: SocketAddr,
    encoding: PayloadEncoding,
    max_packet_bytes: usize,
}

impl StreamReceiver {
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        encoding: PayloadEncoding,
        max_packet_bytes: usize,
    ) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            encoding,
            max_packet_bytes,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// `None` blocks until a packet arrives.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ProtocolError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn recv_packet(&mut self) -> Result<Packet, ProtocolError> {
        protocol::recv_packet(&mut self.stream, self.encoding, self.max_packet_bytes)
    }

    pub fn send_command(&mut self, command: &ControlCommand) -> Result<(), ProtocolError> {
        protocol::send_control(&mut self.stream, command, self.max_packet_bytes)
    }

    /// A sender sharing this connection, for use from another thread.
    pub fn command_sender(&self) -> Result<CommandSender, ProtocolError> {
        Ok(CommandSender {
            stream: self.stream.try_clone()?,
            max_packet_bytes: self.max_packet_bytes,
        })
    }

    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub struct CommandSender {
    stream: TcpStream,
    max_packet_bytes: usize,
}

impl CommandSender {
    pub fn send(&mut self, command: &ControlCommand) -> Result<(), ProtocolError> {
        protocol::send_control(&mut self.stream, command, self.max_packet_bytes)
    }

    /// Unblocks a receiver waiting on the same connection.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
