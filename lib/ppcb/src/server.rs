//! Server session drivers. Both variants serve one session at a time and
//! return to listening; payload bytes are written to the supplied sink in
//! strict packet order and flushed after every DATA frame.
//!
//! Per-session failures are logged and end only that session. Errors that
//! propagate out of `serve_one`/`run` are listener-level: a broken accept
//! loop or a failing output sink.

use crate::codec::{self, Handshake};
use crate::logging::{self, debug, error, Logger};
use crate::packet::{self, Packet};
use crate::retry::{self, Verdict};
use crate::shared::{
    ErrorType, Mode, NetworkResult, SessionId, BUFFER_SIZE, MAX_RETRANSMITS, MAX_WAIT, START_NO,
};
use crate::transport::Link;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, UdpSocket};

/// Accepts stream connections and serves one session per connection.
pub struct StreamServer {
    listener: TcpListener,
    scratch: Vec<u8>,
    log: Logger,
}

impl StreamServer {
    pub fn bind<'a, L: Into<Option<&'a Logger>>>(port: u16, log: L) -> NetworkResult<StreamServer> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let log = logging::child(log);
        debug!(log, "listening"; "addr" => %listener.local_addr()?);

        Ok(StreamServer {
            listener,
            scratch: vec![0u8; BUFFER_SIZE],
            log,
        })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts and serves clients until a listener-level failure.
    pub fn run<W: Write>(&mut self, out: &mut W) -> NetworkResult<()> {
        loop {
            self.serve_one(out)?;
        }
    }

    /// Accepts one connection and serves a single session on it. The
    /// connection is closed afterwards either way.
    pub fn serve_one<W: Write>(&mut self, out: &mut W) -> NetworkResult<()> {
        let (stream, peer) = self.listener.accept()?;
        debug!(self.log, "accepted connection"; "peer" => %peer);
        stream.set_read_timeout(Some(MAX_WAIT))?;

        let mut link = Link::stream(stream);
        let result = self.serve_session(&mut link, out);
        debug!(self.log, "closing connection"; "peer" => %peer);
        result
    }

    fn serve_session<W: Write>(&mut self, link: &mut Link, out: &mut W) -> NetworkResult<()> {
        let handshake = match self.handshake(link) {
            Ok(handshake) => handshake,
            Err(err) => {
                error!(self.log, "failed to establish session"; "kind" => ?err);
                return Ok(());
            }
        };

        let mut left = handshake.total_count;
        let mut expected_no = START_NO;
        while left > 0 {
            let count = match self.recv_data(link, handshake.session_id, expected_no, left) {
                Ok(count) => count,
                Err(err) => {
                    match err {
                        ErrorType::Timeout | ErrorType::Io(_) => {}
                        _ => self.reject(link, err, handshake.session_id, expected_no),
                    }
                    error!(self.log, "abandoning session";
                           "session_id" => handshake.session_id,
                           "kind" => ?err);
                    return Ok(());
                }
            };

            out.write_all(&self.scratch[..count as usize])?;
            out.flush()?;

            left -= count as u64;
            expected_no += 1;
        }

        let receipt = Packet::Rcvd {
            session_id: handshake.session_id,
        }
        .to_vec();
        if let Err(err) = link.send_frame(&receipt) {
            error!(self.log, "failed to send RCVD"; "kind" => ?err);
            return Ok(());
        }
        debug!(self.log, "received all data"; "bytes" => handshake.total_count);
        Ok(())
    }

    fn handshake(&mut self, link: &mut Link) -> NetworkResult<Handshake> {
        let mut frame = [0u8; packet::CONN_SIZE];
        link.read_exact(&mut frame)?;
        let handshake = codec::conn(&frame, Mode::Stream)?;
        debug!(self.log, "session established";
               "session_id" => handshake.session_id,
               "total_count" => handshake.total_count);

        link.send_frame(
            &Packet::ConAcc {
                session_id: handshake.session_id,
            }
            .to_vec(),
        )?;
        Ok(handshake)
    }

    /// Reads one DATA frame: header first, payload once the length is
    /// validated. The payload lands at the start of the scratch buffer.
    fn recv_data(
        &mut self,
        link: &mut Link,
        session_id: SessionId,
        expected_no: u64,
        left: u64,
    ) -> NetworkResult<u32> {
        let mut header = [0u8; packet::DATA_HEADER_SIZE];
        link.read_exact(&mut header)?;
        let count = codec::data_header(&header, session_id, expected_no)?;
        if count as u64 > left {
            return Err(ErrorType::PacketCountRange(count));
        }
        link.read_exact(&mut self.scratch[..count as usize])?;
        debug!(self.log, "received DATA"; "packet_no" => expected_no, "packet_count" => count);
        Ok(count)
    }

    /// Rejects malformed traffic on the connection; a foreign session id is
    /// echoed back to its sender.
    fn reject(&mut self, link: &mut Link, err: ErrorType, session_id: SessionId, packet_no: u64) {
        let session_id = match err {
            ErrorType::SessionMismatch(foreign_id) => foreign_id,
            _ => session_id,
        };
        let frame = Packet::Rjt {
            session_id,
            packet_no,
        }
        .to_vec();
        if let Err(err) = link.send_frame(&frame) {
            debug!(self.log, "failed to send RJT"; "kind" => ?err);
        } else {
            debug!(self.log, "sent RJT"; "session_id" => session_id, "packet_no" => packet_no);
        }
    }
}

/// Serves datagram sessions on one socket: LISTEN with no deadline, then one
/// active session at a time under the receive deadline.
pub struct DatagramServer {
    link: Link,
    scratch: Vec<u8>,
    session_id: SessionId,
    retransmit: bool,
    expected_no: u64,
    left: u64,
    /// Source of the last received datagram; rejects are addressed here so
    /// an intruder gets its answer instead of the session peer.
    last_src: Option<SocketAddr>,
    log: Logger,
}

impl DatagramServer {
    pub fn bind<'a, L: Into<Option<&'a Logger>>>(
        port: u16,
        log: L,
    ) -> NetworkResult<DatagramServer> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        let link = Link::datagram(socket);
        let log = logging::child(log);
        debug!(log, "listening"; "addr" => %link.local_addr()?);

        Ok(DatagramServer {
            link,
            scratch: vec![0u8; BUFFER_SIZE],
            session_id: 0,
            retransmit: false,
            expected_no: START_NO,
            left: 0,
            last_src: None,
            log,
        })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.link.local_addr()
    }

    /// Serves sessions until an output failure.
    pub fn run<W: Write>(&mut self, out: &mut W) -> NetworkResult<()> {
        loop {
            self.serve_one(out)?;
        }
    }

    /// Waits for a CONN (with the deadline cleared) and serves the session
    /// it establishes.
    pub fn serve_one<W: Write>(&mut self, out: &mut W) -> NetworkResult<()> {
        self.link.set_deadline(None)?;

        let (nread, src) = match self.link.recv_datagram(&mut self.scratch) {
            Ok(received) => received,
            Err(err) => {
                error!(self.log, "listen receive failed"; "kind" => ?err);
                return Ok(());
            }
        };
        let handshake = match codec::conn(&self.scratch[..nread], Mode::Datagram) {
            Ok(handshake) => handshake,
            Err(err) => {
                error!(self.log, "failed to receive CONN"; "kind" => ?err);
                return Ok(());
            }
        };

        self.adopt(&handshake, src)?;

        if let Err(err) = self.send_packet(&Packet::ConAcc {
            session_id: self.session_id,
        }) {
            error!(self.log, "failed to send CONACC"; "kind" => ?err);
            return Ok(());
        }

        while self.left > 0 {
            let count = match self.next_chunk() {
                Ok(count) => count,
                Err(err) => {
                    error!(self.log, "abandoning session";
                           "session_id" => self.session_id,
                           "kind" => ?err);
                    return Ok(());
                }
            };

            if count as u64 > self.left {
                error!(self.log, "received too many bytes";
                       "session_id" => self.session_id,
                       "packet_count" => count,
                       "left" => self.left);
                self.reject(self.session_id, self.expected_no);
                return Ok(());
            }

            let payload_at = packet::DATA_HEADER_SIZE;
            out.write_all(&self.scratch[payload_at..payload_at + count as usize])?;
            out.flush()?;

            if self.retransmit {
                let ack = Packet::Acc {
                    session_id: self.session_id,
                    packet_no: self.expected_no,
                };
                if let Err(err) = self.send_packet(&ack) {
                    error!(self.log, "failed to send ACC"; "kind" => ?err);
                    return Ok(());
                }
            }

            self.left -= count as u64;
            self.expected_no += 1;
        }

        if let Err(err) = self.send_packet(&Packet::Rcvd {
            session_id: self.session_id,
        }) {
            error!(self.log, "failed to send RCVD"; "kind" => ?err);
            return Ok(());
        }
        debug!(self.log, "received all data"; "bytes" => handshake.total_count);
        Ok(())
    }

    fn adopt(&mut self, handshake: &Handshake, peer: SocketAddr) -> NetworkResult<()> {
        self.session_id = handshake.session_id;
        self.retransmit = handshake.retransmit;
        self.left = handshake.total_count;
        self.expected_no = START_NO;
        self.last_src = None;
        self.link.set_peer(peer);
        self.link.set_deadline(Some(MAX_WAIT))?;
        debug!(self.log, "session established";
               "session_id" => self.session_id,
               "peer" => %peer,
               "total_count" => self.left,
               "retransmit" => self.retransmit);
        Ok(())
    }

    /// Receives the next in-order DATA frame, answering intrusions and
    /// retransmitting CONACC/ACC on timeout in the retransmitting mode.
    /// The payload lands in the scratch buffer behind the header.
    fn next_chunk(&mut self) -> NetworkResult<u32> {
        let received = retry::recv_within(
            self,
            MAX_WAIT,
            |server| server.recv_data_frame(),
            |server, err| server.tolerate_data(err),
        );
        match received {
            Err(ErrorType::Timeout) if self.retransmit => {
                if self.expected_no == START_NO {
                    self.retransmit_conacc()
                } else {
                    self.retransmit_acc()
                }
            }
            Err(err) => {
                // Malformed traffic gets a reject; a timeout or a transport
                // failure does not.
                match err {
                    ErrorType::Timeout | ErrorType::Io(_) => {}
                    _ => self.reject(self.session_id, self.expected_no),
                }
                Err(err)
            }
            ok => ok,
        }
    }

    /// Failures the active session survives: intrusions are answered with a
    /// reject carrying the intruder's own session id, stale duplicates are
    /// dropped.
    fn tolerate_data(&mut self, err: ErrorType) -> bool {
        match err {
            ErrorType::ForeignConn(foreign_id) => {
                self.reject_conn(foreign_id);
                true
            }
            ErrorType::SessionMismatch(foreign_id) => {
                self.reject(foreign_id, self.expected_no);
                true
            }
            ErrorType::Stale => true,
            _ => false,
        }
    }

    fn retransmit_conacc(&mut self) -> NetworkResult<u32> {
        debug!(self.log, "retransmitting CONACC"; "session_id" => self.session_id);
        retry::request_reply(
            self,
            MAX_RETRANSMITS,
            MAX_WAIT,
            |server| {
                server.send_packet(&Packet::ConAcc {
                    session_id: server.session_id,
                })
            },
            |server| server.recv_data_frame(),
            |server, err| server.reply_policy(err),
        )
    }

    fn retransmit_acc(&mut self) -> NetworkResult<u32> {
        debug!(self.log, "retransmitting ACC"; "packet_no" => self.expected_no - 1);
        retry::request_reply(
            self,
            MAX_RETRANSMITS,
            MAX_WAIT,
            |server| {
                let packet_no = server.expected_no - 1;
                server.send_packet(&Packet::Acc {
                    session_id: server.session_id,
                    packet_no,
                })
            },
            |server| server.recv_data_frame(),
            |server, err| server.reply_policy(err),
        )
    }

    fn reply_policy(&mut self, err: ErrorType) -> Verdict {
        match err {
            ErrorType::ForeignConn(foreign_id) => {
                self.reject_conn(foreign_id);
                Verdict::Free
            }
            ErrorType::SessionMismatch(foreign_id) => {
                self.reject(foreign_id, self.expected_no);
                Verdict::Free
            }
            ErrorType::Stale => Verdict::Free,
            ErrorType::Timeout => Verdict::Consume,
            ErrorType::Io(_) => Verdict::Abort,
            _ => {
                self.reject(self.session_id, self.expected_no);
                Verdict::Abort
            }
        }
    }

    fn recv_data_frame(&mut self) -> NetworkResult<u32> {
        let (nread, src) = self.link.recv_datagram(&mut self.scratch)?;
        self.last_src = Some(src);
        let payload = codec::data(
            &self.scratch[..nread],
            self.session_id,
            self.expected_no,
            self.retransmit,
        )?;
        let count = payload.len() as u32;
        debug!(self.log, "received DATA"; "packet_no" => self.expected_no, "packet_count" => count);
        Ok(count)
    }

    fn send_packet(&mut self, packet: &Packet) -> NetworkResult<()> {
        let frame = packet.to_vec();
        self.link.send_frame(&frame)?;
        debug!(self.log, "sent packet"; "type" => ?packet.type_id(), "size" => frame.len());
        Ok(())
    }

    /// Best-effort RJT to the source of the offending datagram.
    fn reject(&mut self, session_id: SessionId, packet_no: u64) {
        let frame = Packet::Rjt {
            session_id,
            packet_no,
        }
        .to_vec();
        self.send_reject(&frame, "RJT", session_id);
    }

    /// Best-effort CONRJT to the intruding connector.
    fn reject_conn(&mut self, session_id: SessionId) {
        let frame = Packet::ConRjt { session_id }.to_vec();
        self.send_reject(&frame, "CONRJT", session_id);
    }

    fn send_reject(&mut self, frame: &[u8], name: &str, session_id: SessionId) {
        let result = match self.last_src {
            Some(addr) => self.link.send_frame_to(frame, addr),
            None => self.link.send_frame(frame),
        };
        match result {
            Ok(()) => debug!(self.log, "sent reject"; "type" => name, "session_id" => session_id),
            Err(err) => debug!(self.log, "failed to send reject"; "type" => name, "kind" => ?err),
        }
    }
}
