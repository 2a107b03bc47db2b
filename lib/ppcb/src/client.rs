//! Client session driver: establishes a session, pumps the payload out as
//! DATA frames and waits for the final receipt.

use crate::codec;
use crate::logging::{self, debug, Logger};
use crate::packet::{self, Packet};
use crate::retry::{self, Verdict};
use crate::shared::{
    ErrorType, Mode, NetworkResult, SessionId, BUFFER_SIZE, MAX_PACKET_COUNT, MAX_RETRANSMITS,
    MAX_WAIT, START_NO,
};
use crate::transport::Link;
use rand::{thread_rng, Rng};
use std::net::SocketAddr;

pub struct Client {
    link: Link,
    mode: Mode,
    session_id: SessionId,
    scratch: Vec<u8>,
    log: Logger,
}

impl Client {
    /// Opens the transport for `mode` and draws a fresh session id.
    pub fn connect<'a, L: Into<Option<&'a Logger>>>(
        mode: Mode,
        addr: SocketAddr,
        log: L,
    ) -> NetworkResult<Client> {
        let link = match mode {
            Mode::Stream => Link::connect_stream(addr)?,
            Mode::Datagram | Mode::DatagramRetrans => Link::connect_datagram(addr)?,
        };
        link.set_deadline(Some(MAX_WAIT))?;

        let session_id: SessionId = thread_rng().gen();
        let log = logging::child(log);
        debug!(log, "connected";
               "peer" => %addr,
               "session_id" => session_id,
               "mode" => ?mode);

        Ok(Client {
            link,
            mode,
            session_id,
            scratch: vec![0u8; BUFFER_SIZE],
            log,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Ships the whole payload and waits for the final receipt. Returns
    /// only once the peer has confirmed the complete transfer.
    pub fn send_all(&mut self, payload: &[u8]) -> NetworkResult<()> {
        let total_count = payload.len() as u64;

        self.send_conn(total_count)?;
        self.await_conacc(total_count)?;
        self.push_data(payload)?;
        debug!(self.log, "sent all data"; "bytes" => total_count);
        self.await_rcvd()?;
        debug!(self.log, "transfer acknowledged"; "session_id" => self.session_id);
        Ok(())
    }

    fn await_conacc(&mut self, total_count: u64) -> NetworkResult<()> {
        if self.mode == Mode::Stream {
            return self.recv_conacc_stream();
        }
        match retry::recv_within(
            self,
            MAX_WAIT,
            |client| client.recv_conacc_frame(),
            |_, err| matches!(err, ErrorType::SessionMismatch(_)),
        ) {
            Err(ErrorType::Timeout) if self.mode == Mode::DatagramRetrans => {
                self.retransmit_conn(total_count)
            }
            other => other,
        }
    }

    fn push_data(&mut self, payload: &[u8]) -> NetworkResult<()> {
        let mut sent = 0usize;
        let mut packet_no = START_NO;
        while sent < payload.len() {
            let count = chunk_len(payload.len() - sent);
            let chunk = &payload[sent..sent + count];
            self.send_data(packet_no, chunk)?;
            if self.mode == Mode::DatagramRetrans {
                self.await_acc(packet_no, chunk)?;
            }
            sent += count;
            packet_no += 1;
        }
        Ok(())
    }

    fn await_acc(&mut self, packet_no: u64, chunk: &[u8]) -> NetworkResult<()> {
        match retry::recv_within(
            self,
            MAX_WAIT,
            |client| client.recv_acc_frame(packet_no),
            |_, err| matches!(err, ErrorType::SessionMismatch(_) | ErrorType::Stale),
        ) {
            Err(ErrorType::Timeout) => self.retransmit_data(packet_no, chunk),
            other => other,
        }
    }

    /// The final receipt is only re-read, never re-solicited: the peer
    /// retransmits its side on its own timeout.
    fn await_rcvd(&mut self) -> NetworkResult<()> {
        if self.mode == Mode::Stream {
            return self.recv_rcvd_stream();
        }
        retry::recv_within(
            self,
            MAX_WAIT,
            |client| client.recv_rcvd_frame(),
            |_, err| matches!(err, ErrorType::SessionMismatch(_) | ErrorType::Stale),
        )
    }

    fn retransmit_conn(&mut self, total_count: u64) -> NetworkResult<()> {
        debug!(self.log, "retransmitting CONN"; "session_id" => self.session_id);
        retry::request_reply(
            self,
            MAX_RETRANSMITS,
            MAX_WAIT,
            |client| client.send_conn(total_count),
            |client| client.recv_conacc_frame(),
            |_, err| soft_policy(err),
        )
    }

    fn retransmit_data(&mut self, packet_no: u64, chunk: &[u8]) -> NetworkResult<()> {
        debug!(self.log, "retransmitting DATA"; "packet_no" => packet_no);
        retry::request_reply(
            self,
            MAX_RETRANSMITS,
            MAX_WAIT,
            |client| client.send_data(packet_no, chunk),
            |client| client.recv_acc_frame(packet_no),
            |_, err| soft_policy(err),
        )
    }

    fn send_conn(&mut self, total_count: u64) -> NetworkResult<()> {
        self.send_packet(&Packet::Conn {
            session_id: self.session_id,
            protocol_id: self.mode.protocol_id(),
            total_count,
        })
    }

    fn send_data(&mut self, packet_no: u64, payload: &[u8]) -> NetworkResult<()> {
        self.send_packet(&Packet::Data {
            session_id: self.session_id,
            packet_no,
            payload,
        })
    }

    fn send_packet(&mut self, packet: &Packet) -> NetworkResult<()> {
        let frame = packet.to_vec();
        self.link.send_frame(&frame)?;
        debug!(self.log, "sent packet"; "type" => ?packet.type_id(), "size" => frame.len());
        Ok(())
    }

    fn recv_conacc_stream(&mut self) -> NetworkResult<()> {
        let mut frame = [0u8; packet::CONACC_SIZE];
        self.link.read_exact(&mut frame)?;
        codec::conacc(&frame, self.session_id)
    }

    fn recv_rcvd_stream(&mut self) -> NetworkResult<()> {
        let mut frame = [0u8; packet::RCVD_SIZE];
        self.link.read_exact(&mut frame)?;
        codec::rcvd(&frame, self.session_id, false)
    }

    fn recv_conacc_frame(&mut self) -> NetworkResult<()> {
        let (nread, _) = self.link.recv_datagram(&mut self.scratch)?;
        codec::conacc(&self.scratch[..nread], self.session_id)
    }

    fn recv_acc_frame(&mut self, packet_no: u64) -> NetworkResult<()> {
        let (nread, _) = self.link.recv_datagram(&mut self.scratch)?;
        codec::acc(&self.scratch[..nread], self.session_id, packet_no)
    }

    fn recv_rcvd_frame(&mut self) -> NetworkResult<()> {
        let (nread, _) = self.link.recv_datagram(&mut self.scratch)?;
        codec::rcvd(
            &self.scratch[..nread],
            self.session_id,
            self.mode == Mode::DatagramRetrans,
        )
    }
}

/// Frames from other sessions and stale duplicates never burn a
/// retransmission; only a timeout does.
fn soft_policy(err: ErrorType) -> Verdict {
    match err {
        ErrorType::SessionMismatch(_) | ErrorType::Stale => Verdict::Free,
        ErrorType::Timeout => Verdict::Consume,
        _ => Verdict::Abort,
    }
}

/// Next DATA payload size: uniform in `1..=min(MAX_PACKET_COUNT, left)`.
fn chunk_len(left: usize) -> usize {
    let cap = left.min(MAX_PACKET_COUNT as usize);
    thread_rng().gen_range(1..=cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_len_bounds() {
        for _ in 0..1000 {
            let len = chunk_len(250_000);
            assert!(len >= 1 && len <= MAX_PACKET_COUNT as usize);
        }
        assert_eq!(chunk_len(1), 1);
        for _ in 0..100 {
            let len = chunk_len(17);
            assert!(len >= 1 && len <= 17);
        }
    }

    #[test]
    fn test_soft_policy() {
        assert_eq!(soft_policy(ErrorType::SessionMismatch(1)), Verdict::Free);
        assert_eq!(soft_policy(ErrorType::Stale), Verdict::Free);
        assert_eq!(soft_policy(ErrorType::Timeout), Verdict::Consume);
        assert_eq!(soft_policy(ErrorType::TypeMismatch(6)), Verdict::Abort);
    }
}
