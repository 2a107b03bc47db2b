//! Frame transport over a connected stream or an unconnected datagram
//! socket. Receives are bounded by a deadline (`SO_RCVTIMEO`); deadline
//! expiry surfaces as `ErrorType::Timeout` through the `io::Error`
//! conversion in `shared`.

use crate::shared::{ErrorType, NetworkResult};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

pub enum Link {
    Stream(TcpStream),
    Datagram {
        socket: UdpSocket,
        /// Session peer; every plain `send_frame` goes here.
        peer: Option<SocketAddr>,
    },
}

impl Link {
    /// Opens a stream connection to the server.
    pub fn connect_stream(addr: SocketAddr) -> NetworkResult<Link> {
        let stream = TcpStream::connect(addr)?;
        Ok(Link::Stream(stream))
    }

    /// Binds an ephemeral datagram socket talking to the server.
    pub fn connect_datagram(addr: SocketAddr) -> NetworkResult<Link> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Link::Datagram {
            socket,
            peer: Some(addr),
        })
    }

    /// Wraps an accepted stream connection.
    pub fn stream(stream: TcpStream) -> Link {
        Link::Stream(stream)
    }

    /// Wraps a bound datagram socket with no peer yet (server side).
    pub fn datagram(socket: UdpSocket) -> Link {
        Link::Datagram { socket, peer: None }
    }

    /// Arms or clears the receive deadline.
    pub fn set_deadline(&self, deadline: Option<Duration>) -> NetworkResult<()> {
        match self {
            Link::Stream(stream) => stream.set_read_timeout(deadline)?,
            Link::Datagram { socket, .. } => socket.set_read_timeout(deadline)?,
        }
        Ok(())
    }

    /// Adopts the session peer all subsequent `send_frame` calls address.
    pub fn set_peer(&mut self, addr: SocketAddr) {
        match self {
            Link::Datagram { peer, .. } => *peer = Some(addr),
            Link::Stream(_) => {}
        }
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        let addr = match self {
            Link::Stream(stream) => stream.local_addr()?,
            Link::Datagram { socket, .. } => socket.local_addr()?,
        };
        Ok(addr)
    }

    /// Sends one frame to the session peer. On a stream this loops until the
    /// whole frame is written; on a datagram a short write is an error.
    pub fn send_frame(&mut self, frame: &[u8]) -> NetworkResult<()> {
        match self {
            Link::Stream(stream) => stream.write_all(frame).map_err(Into::into),
            Link::Datagram { socket, peer } => {
                let peer = peer.expect("datagram link has no session peer");
                send_datagram(socket, frame, peer)
            }
        }
    }

    /// Sends one frame to an explicit address (reject replies to intruders).
    pub fn send_frame_to(&mut self, frame: &[u8], addr: SocketAddr) -> NetworkResult<()> {
        match self {
            Link::Stream(stream) => stream.write_all(frame).map_err(Into::into),
            Link::Datagram { socket, .. } => send_datagram(socket, frame, addr),
        }
    }

    /// Receives one datagram, capturing the source address.
    pub fn recv_datagram(&self, buf: &mut [u8]) -> NetworkResult<(usize, SocketAddr)> {
        let socket = match self {
            Link::Datagram { socket, .. } => socket,
            Link::Stream(_) => panic!("recv_datagram on a stream link"),
        };
        loop {
            match socket.recv_from(buf) {
                Ok((nread, src)) => return Ok((nread, src)),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reads exactly `buf.len()` bytes off the stream. A closed connection
    /// or a deadline expiry mid-frame fails the whole read.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        match self {
            Link::Stream(stream) => stream.read_exact(buf).map_err(Into::into),
            Link::Datagram { .. } => panic!("read_exact on a datagram link"),
        }
    }
}

fn send_datagram(socket: &UdpSocket, frame: &[u8], addr: SocketAddr) -> NetworkResult<()> {
    let nwritten = loop {
        match socket.send_to(frame, addr) {
            Ok(nwritten) => break nwritten,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    };
    if nwritten != frame.len() {
        return Err(ErrorType::Io(io::ErrorKind::WriteZero));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ErrorType;

    #[test]
    fn test_datagram_roundtrip_captures_source() {
        let receiver = Link::datagram(UdpSocket::bind(("127.0.0.1", 0)).unwrap());
        let addr = receiver.local_addr().unwrap();

        let mut sender = Link::connect_datagram(addr).unwrap();
        sender.send_frame(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let (nread, src) = receiver.recv_datagram(&mut buf).unwrap();

        assert_eq!(&buf[..nread], b"ping");
        assert_eq!(src, sender.local_addr().unwrap());
    }

    #[test]
    fn test_datagram_deadline_times_out() {
        let receiver = Link::datagram(UdpSocket::bind(("127.0.0.1", 0)).unwrap());
        receiver.set_deadline(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(
            receiver.recv_datagram(&mut buf).unwrap_err(),
            ErrorType::Timeout
        );
    }

    #[test]
    fn test_send_frame_to_does_not_move_session_peer() {
        let receiver_a = Link::datagram(UdpSocket::bind(("127.0.0.1", 0)).unwrap());
        let receiver_b = Link::datagram(UdpSocket::bind(("127.0.0.1", 0)).unwrap());

        let mut sender = Link::connect_datagram(receiver_a.local_addr().unwrap()).unwrap();
        sender
            .send_frame_to(b"stray", receiver_b.local_addr().unwrap())
            .unwrap();
        sender.send_frame(b"session").unwrap();

        let mut buf = [0u8; 16];
        let (nread, _) = receiver_b.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..nread], b"stray");
        let (nread, _) = receiver_a.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..nread], b"session");
    }
}
