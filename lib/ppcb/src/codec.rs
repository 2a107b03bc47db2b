//! Expectation-driven frame validation.
//!
//! Every entry point takes a complete received frame plus the caller's
//! session state and either yields the decoded content or classifies the
//! violation. Check order is load-bearing: the session id is inspected
//! before the type (a foreign CONN must classify as an intrusion, not as a
//! type mismatch), and stale retransmissions are recognised before the
//! strict type/number checks reject them.

use crate::packet::{self, TypeId};
use crate::shared::{ErrorType, Mode, NetworkResult, SessionId, MAX_PACKET_COUNT};

/// Decoded CONN handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Handshake {
    pub session_id: SessionId,
    pub total_count: u64,
    /// True when the peer requested the per-packet retransmission variant.
    pub retransmit: bool,
}

/// Legal protocol-id pairings between a CONN and the receiving server.
/// Returns the retransmission flag for the accepted session.
pub fn match_protocols(client: u8, server: Mode) -> NetworkResult<bool> {
    match (client, server) {
        (1, Mode::Stream) => Ok(false),
        (2, Mode::Datagram) => Ok(false),
        (3, Mode::Datagram) => Ok(true),
        _ => Err(ErrorType::ProtocolMismatch(client)),
    }
}

#[inline]
fn type_is(frame: &[u8], type_id: TypeId) -> bool {
    packet::peek_type(frame) == Some(type_id.into())
}

/// Session id of the frame when it differs from the active one. Frames too
/// short to carry a session id pass; the size check catches them later.
#[inline]
fn foreign_session(frame: &[u8], current: SessionId) -> Option<SessionId> {
    match packet::peek_session(frame) {
        Some(session_id) if session_id != current => Some(session_id),
        _ => None,
    }
}

#[inline]
fn check_session(frame: &[u8], current: SessionId) -> NetworkResult<()> {
    match foreign_session(frame, current) {
        Some(session_id) => Err(ErrorType::SessionMismatch(session_id)),
        None => Ok(()),
    }
}

#[inline]
fn check_type(frame: &[u8], expected: TypeId) -> NetworkResult<()> {
    match packet::peek_type(frame) {
        Some(type_id) if type_id != u8::from(expected) => Err(ErrorType::TypeMismatch(type_id)),
        _ => Ok(()),
    }
}

#[inline]
fn check_size(actual: usize, expected: usize) -> NetworkResult<()> {
    if actual != expected {
        return Err(ErrorType::SizeMismatch(actual));
    }
    Ok(())
}

#[inline]
fn check_packet_no(packet_no: u64, expected: u64) -> NetworkResult<()> {
    if packet_no != expected {
        return Err(ErrorType::PacketNoMismatch(packet_no));
    }
    Ok(())
}

#[inline]
fn check_packet_count(packet_count: u32) -> NetworkResult<()> {
    if packet_count < 1 || packet_count > MAX_PACKET_COUNT {
        return Err(ErrorType::PacketCountRange(packet_count));
    }
    Ok(())
}

/// CONN while listening. Validates type, size and the protocol pairing and
/// adopts the announced session.
pub fn conn(frame: &[u8], server: Mode) -> NetworkResult<Handshake> {
    check_type(frame, TypeId::Conn)?;
    check_size(frame.len(), packet::CONN_SIZE)?;
    let retransmit = match_protocols(packet::conn_protocol_id(frame), server)?;
    Ok(Handshake {
        session_id: packet::peek_session(frame).expect("length checked"),
        total_count: packet::conn_total_count(frame),
        retransmit,
    })
}

/// CONACC while waiting for the handshake to be accepted.
pub fn conacc(frame: &[u8], session_id: SessionId) -> NetworkResult<()> {
    check_session(frame, session_id)?;
    check_type(frame, TypeId::ConAcc)?;
    check_size(frame.len(), packet::CONACC_SIZE)
}

/// ACC while waiting for `expected_no` to be acknowledged (retransmitting
/// clients only). Duplicate CONACCs and acknowledgements of earlier frames
/// are stale, not fatal.
pub fn acc(frame: &[u8], session_id: SessionId, expected_no: u64) -> NetworkResult<()> {
    check_session(frame, session_id)?;
    if type_is(frame, TypeId::ConAcc) {
        return Err(ErrorType::Stale);
    }
    check_type(frame, TypeId::Acc)?;
    check_size(frame.len(), packet::ACC_SIZE)?;
    let packet_no = packet::packet_no(frame);
    if packet_no < expected_no {
        return Err(ErrorType::Stale);
    }
    check_packet_no(packet_no, expected_no)
}

/// RCVD at the end of a transfer. In the retransmitting mode, leftover
/// CONACC and ACC duplicates are stale.
pub fn rcvd(frame: &[u8], session_id: SessionId, retransmit: bool) -> NetworkResult<()> {
    check_session(frame, session_id)?;
    if retransmit && (type_is(frame, TypeId::ConAcc) || type_is(frame, TypeId::Acc)) {
        return Err(ErrorType::Stale);
    }
    check_type(frame, TypeId::Rcvd)?;
    check_size(frame.len(), packet::RCVD_SIZE)
}

/// DATA during an active datagram session. Returns the payload slice.
///
/// A CONN from another session outranks every other classification so the
/// caller can answer it with a CONRJT; a replayed CONN from the current
/// session and already-delivered DATA frames are stale in the
/// retransmitting mode.
pub fn data<'a>(
    frame: &'a [u8],
    session_id: SessionId,
    expected_no: u64,
    retransmit: bool,
) -> NetworkResult<&'a [u8]> {
    if let Some(foreign_id) = foreign_session(frame, session_id) {
        if type_is(frame, TypeId::Conn) {
            return Err(ErrorType::ForeignConn(foreign_id));
        }
        return Err(ErrorType::SessionMismatch(foreign_id));
    }
    if retransmit && type_is(frame, TypeId::Conn) {
        return Err(ErrorType::Stale);
    }
    check_type(frame, TypeId::Data)?;
    if frame.len() < packet::DATA_HEADER_SIZE {
        return Err(ErrorType::SizeMismatch(frame.len()));
    }
    let packet_no = packet::packet_no(frame);
    if retransmit && packet_no < expected_no {
        return Err(ErrorType::Stale);
    }
    check_packet_no(packet_no, expected_no)?;
    let packet_count = packet::data_packet_count(frame);
    check_packet_count(packet_count)?;
    check_size(frame.len(), packet::DATA_HEADER_SIZE + packet_count as usize)?;
    Ok(&frame[packet::DATA_HEADER_SIZE..])
}

/// DATA header on a stream; the payload is read separately once the length
/// is known. Returns the validated payload length.
pub fn data_header(header: &[u8], session_id: SessionId, expected_no: u64) -> NetworkResult<u32> {
    check_session(header, session_id)?;
    check_type(header, TypeId::Data)?;
    check_packet_no(packet::packet_no(header), expected_no)?;
    let packet_count = packet::data_packet_count(header);
    check_packet_count(packet_count)?;
    Ok(packet_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    const SESSION: SessionId = 0xdead_beef_cafe_0001;
    const OTHER: SessionId = 0xdead_beef_cafe_0002;

    fn data_frame(session_id: SessionId, packet_no: u64, payload: &[u8]) -> Vec<u8> {
        Packet::Data {
            session_id,
            packet_no,
            payload,
        }
        .to_vec()
    }

    #[test]
    fn test_conn_accepts_matching_pairings() {
        let frame = Packet::Conn {
            session_id: SESSION,
            protocol_id: 3,
            total_count: 100,
        }
        .to_vec();

        let handshake = conn(&frame, Mode::Datagram).unwrap();
        assert_eq!(handshake.session_id, SESSION);
        assert_eq!(handshake.total_count, 100);
        assert!(handshake.retransmit);
    }

    #[test]
    fn test_conn_rejects_illegal_pairings() {
        for (protocol_id, server) in &[
            (1u8, Mode::Datagram),
            (2, Mode::Stream),
            (3, Mode::Stream),
            (99, Mode::Stream),
            (99, Mode::Datagram),
        ] {
            let frame = Packet::Conn {
                session_id: SESSION,
                protocol_id: *protocol_id,
                total_count: 1,
            }
            .to_vec();

            assert_eq!(
                conn(&frame, *server).unwrap_err(),
                ErrorType::ProtocolMismatch(*protocol_id)
            );
        }
    }

    #[test]
    fn test_conn_rejects_trailing_junk() {
        let mut frame = Packet::Conn {
            session_id: SESSION,
            protocol_id: 2,
            total_count: 1,
        }
        .to_vec();
        frame.push(0);

        assert_eq!(
            conn(&frame, Mode::Datagram).unwrap_err(),
            ErrorType::SizeMismatch(19)
        );
    }

    #[test]
    fn test_conacc_checks_session_before_type() {
        // A foreign frame of the wrong type must classify as a session
        // mismatch, not a type mismatch.
        let frame = Packet::Rjt {
            session_id: OTHER,
            packet_no: 0,
        }
        .to_vec();

        assert_eq!(
            conacc(&frame, SESSION).unwrap_err(),
            ErrorType::SessionMismatch(OTHER)
        );
    }

    #[test]
    fn test_conacc_rejects_conrjt_as_type_mismatch() {
        let frame = Packet::ConRjt { session_id: SESSION }.to_vec();
        assert_eq!(conacc(&frame, SESSION).unwrap_err(), ErrorType::TypeMismatch(3));
    }

    #[test]
    fn test_empty_and_short_frames_fail_on_size() {
        assert_eq!(conacc(&[], SESSION).unwrap_err(), ErrorType::SizeMismatch(0));
        // Short frame with a correct leading type byte: the session check
        // cannot run, the size check reports it.
        assert_eq!(
            conacc(&[2, 0, 0], SESSION).unwrap_err(),
            ErrorType::SizeMismatch(3)
        );
    }

    #[test]
    fn test_data_happy_path() {
        let frame = data_frame(SESSION, 5, b"payload");
        assert_eq!(data(&frame, SESSION, 5, false).unwrap(), b"payload");
    }

    #[test]
    fn test_data_foreign_conn_outranks_type() {
        let frame = Packet::Conn {
            session_id: OTHER,
            protocol_id: 2,
            total_count: 9,
        }
        .to_vec();

        assert_eq!(
            data(&frame, SESSION, 0, false).unwrap_err(),
            ErrorType::ForeignConn(OTHER)
        );
    }

    #[test]
    fn test_data_foreign_session() {
        let frame = data_frame(OTHER, 0, b"x");
        assert_eq!(
            data(&frame, SESSION, 0, true).unwrap_err(),
            ErrorType::SessionMismatch(OTHER)
        );
    }

    #[test]
    fn test_data_replayed_conn_is_stale_when_retransmitting() {
        let frame = Packet::Conn {
            session_id: SESSION,
            protocol_id: 3,
            total_count: 9,
        }
        .to_vec();

        assert_eq!(data(&frame, SESSION, 0, true).unwrap_err(), ErrorType::Stale);
        // Without retransmission the same frame is a plain type mismatch.
        assert_eq!(
            data(&frame, SESSION, 0, false).unwrap_err(),
            ErrorType::TypeMismatch(1)
        );
    }

    #[test]
    fn test_data_old_packet_no_stale_vs_fatal() {
        let frame = data_frame(SESSION, 2, b"x");
        assert_eq!(data(&frame, SESSION, 4, true).unwrap_err(), ErrorType::Stale);
        assert_eq!(
            data(&frame, SESSION, 4, false).unwrap_err(),
            ErrorType::PacketNoMismatch(2)
        );
        // Forward jumps are fatal in both variants.
        assert_eq!(
            data(&frame, SESSION, 1, true).unwrap_err(),
            ErrorType::PacketNoMismatch(2)
        );
    }

    #[test]
    fn test_data_zero_count_rejected() {
        let frame = data_frame(SESSION, 0, b"");
        assert_eq!(
            data(&frame, SESSION, 0, false).unwrap_err(),
            ErrorType::PacketCountRange(0)
        );
    }

    #[test]
    fn test_data_count_field_must_match_payload_length() {
        let mut frame = data_frame(SESSION, 0, b"abcd");
        frame.truncate(frame.len() - 1);

        assert_eq!(
            data(&frame, SESSION, 0, false).unwrap_err(),
            ErrorType::SizeMismatch(packet::DATA_HEADER_SIZE + 3)
        );
    }

    #[test]
    fn test_data_header_for_stream() {
        let frame = data_frame(SESSION, 3, b"abc");
        assert_eq!(
            data_header(&frame[..packet::DATA_HEADER_SIZE], SESSION, 3).unwrap(),
            3
        );
        assert_eq!(
            data_header(&frame[..packet::DATA_HEADER_SIZE], SESSION, 4).unwrap_err(),
            ErrorType::PacketNoMismatch(3)
        );
    }

    #[test]
    fn test_acc_stale_rules() {
        let conacc_frame = Packet::ConAcc { session_id: SESSION }.to_vec();
        assert_eq!(acc(&conacc_frame, SESSION, 1).unwrap_err(), ErrorType::Stale);

        let old = Packet::Acc {
            session_id: SESSION,
            packet_no: 0,
        }
        .to_vec();
        assert_eq!(acc(&old, SESSION, 1).unwrap_err(), ErrorType::Stale);

        let future = Packet::Acc {
            session_id: SESSION,
            packet_no: 2,
        }
        .to_vec();
        assert_eq!(
            acc(&future, SESSION, 1).unwrap_err(),
            ErrorType::PacketNoMismatch(2)
        );

        let expected = Packet::Acc {
            session_id: SESSION,
            packet_no: 1,
        }
        .to_vec();
        assert!(acc(&expected, SESSION, 1).is_ok());
    }

    #[test]
    fn test_rcvd_stale_rules() {
        let frame = Packet::Rcvd { session_id: SESSION }.to_vec();
        assert!(rcvd(&frame, SESSION, true).is_ok());

        let leftover_acc = Packet::Acc {
            session_id: SESSION,
            packet_no: 7,
        }
        .to_vec();
        assert_eq!(rcvd(&leftover_acc, SESSION, true).unwrap_err(), ErrorType::Stale);
        // Outside the retransmitting mode a leftover ACC is unexpected.
        assert_eq!(
            rcvd(&leftover_acc, SESSION, false).unwrap_err(),
            ErrorType::TypeMismatch(5)
        );
    }
}
