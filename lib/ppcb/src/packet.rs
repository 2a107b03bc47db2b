use crate::shared::SessionId;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io;

/// Wire identifiers of the seven packet types.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TypeId {
    Conn = 1,
    ConAcc = 2,
    ConRjt = 3,
    Data = 4,
    Acc = 5,
    Rjt = 6,
    Rcvd = 7,
}

impl From<TypeId> for u8 {
    #[inline]
    fn from(type_id: TypeId) -> Self {
        type_id as u8
    }
}

pub const CONN_SIZE: usize = 18;
pub const CONACC_SIZE: usize = 9;
pub const CONRJT_SIZE: usize = 9;
pub const DATA_HEADER_SIZE: usize = 21;
pub const ACC_SIZE: usize = 17;
pub const RJT_SIZE: usize = 17;
pub const RCVD_SIZE: usize = 9;

/// One protocol packet. All multi-byte fields are big-endian on the wire and
/// the layouts are tightly packed; a DATA frame is the header immediately
/// followed by `payload.len()` bytes.
#[derive(Debug, Eq, PartialEq)]
pub enum Packet<'a> {
    Conn {
        session_id: SessionId,
        protocol_id: u8,
        total_count: u64,
    },
    ConAcc {
        session_id: SessionId,
    },
    ConRjt {
        session_id: SessionId,
    },
    Data {
        session_id: SessionId,
        packet_no: u64,
        payload: &'a [u8],
    },
    Acc {
        session_id: SessionId,
        packet_no: u64,
    },
    Rjt {
        session_id: SessionId,
        packet_no: u64,
    },
    Rcvd {
        session_id: SessionId,
    },
}

impl Packet<'_> {
    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            Packet::Conn { .. } => TypeId::Conn,
            Packet::ConAcc { .. } => TypeId::ConAcc,
            Packet::ConRjt { .. } => TypeId::ConRjt,
            Packet::Data { .. } => TypeId::Data,
            Packet::Acc { .. } => TypeId::Acc,
            Packet::Rjt { .. } => TypeId::Rjt,
            Packet::Rcvd { .. } => TypeId::Rcvd,
        }
    }

    /// Encoded size of this packet on the wire.
    #[inline]
    pub fn wire_size(&self) -> usize {
        match self {
            Packet::Conn { .. } => CONN_SIZE,
            Packet::ConAcc { .. } => CONACC_SIZE,
            Packet::ConRjt { .. } => CONRJT_SIZE,
            Packet::Data { payload, .. } => DATA_HEADER_SIZE + payload.len(),
            Packet::Acc { .. } => ACC_SIZE,
            Packet::Rjt { .. } => RJT_SIZE,
            Packet::Rcvd { .. } => RCVD_SIZE,
        }
    }

    /// Writes the byte-exact encoding to the supplied stream.
    pub fn write<W: io::Write>(&self, stream: &mut W) -> io::Result<()> {
        stream.write_u8(self.type_id().into())?;
        match *self {
            Packet::Conn {
                session_id,
                protocol_id,
                total_count,
            } => {
                stream.write_u64::<BigEndian>(session_id)?;
                stream.write_u8(protocol_id)?;
                stream.write_u64::<BigEndian>(total_count)?;
            }
            Packet::ConAcc { session_id }
            | Packet::ConRjt { session_id }
            | Packet::Rcvd { session_id } => {
                stream.write_u64::<BigEndian>(session_id)?;
            }
            Packet::Data {
                session_id,
                packet_no,
                payload,
            } => {
                stream.write_u64::<BigEndian>(session_id)?;
                stream.write_u64::<BigEndian>(packet_no)?;
                stream.write_u32::<BigEndian>(payload.len() as u32)?;
                stream.write_all(payload)?;
            }
            Packet::Acc {
                session_id,
                packet_no,
            }
            | Packet::Rjt {
                session_id,
                packet_no,
            } => {
                stream.write_u64::<BigEndian>(session_id)?;
                stream.write_u64::<BigEndian>(packet_no)?;
            }
        }
        Ok(())
    }

    /// Encodes into a fresh frame buffer. Writing to memory cannot fail.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.wire_size());
        self.write(&mut frame).expect("in-memory encode");
        frame
    }
}

/// Type byte of a frame, if one is present.
#[inline]
pub fn peek_type(frame: &[u8]) -> Option<u8> {
    frame.first().copied()
}

/// Session id of a frame, if enough bytes arrived to hold one.
#[inline]
pub fn peek_session(frame: &[u8]) -> Option<SessionId> {
    if frame.len() >= CONACC_SIZE {
        Some(BigEndian::read_u64(&frame[1..9]))
    } else {
        None
    }
}

/// CONN field accessors. Callers must have validated the frame length.
#[inline]
pub fn conn_protocol_id(frame: &[u8]) -> u8 {
    frame[9]
}

#[inline]
pub fn conn_total_count(frame: &[u8]) -> u64 {
    BigEndian::read_u64(&frame[10..18])
}

/// Packet number field shared by DATA, ACC and RJT.
#[inline]
pub fn packet_no(frame: &[u8]) -> u64 {
    BigEndian::read_u64(&frame[9..17])
}

/// Payload length field of a DATA header.
#[inline]
pub fn data_packet_count(frame: &[u8]) -> u32 {
    BigEndian::read_u32(&frame[17..21])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_layout() {
        let frame = Packet::Conn {
            session_id: 0x0102030405060708,
            protocol_id: 3,
            total_count: 0x1122334455667788,
        }
        .to_vec();

        assert_eq!(frame.len(), CONN_SIZE);
        assert_eq!(frame[0], 1);
        assert_eq!(&frame[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame[9], 3);
        assert_eq!(&frame[10..18], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);

        assert_eq!(peek_type(&frame), Some(1));
        assert_eq!(peek_session(&frame), Some(0x0102030405060708));
        assert_eq!(conn_protocol_id(&frame), 3);
        assert_eq!(conn_total_count(&frame), 0x1122334455667788);
    }

    #[test]
    fn test_data_layout() {
        let frame = Packet::Data {
            session_id: 7,
            packet_no: 0x0a0b,
            payload: b"abc",
        }
        .to_vec();

        assert_eq!(frame.len(), DATA_HEADER_SIZE + 3);
        assert_eq!(frame[0], 4);
        assert_eq!(peek_session(&frame), Some(7));
        assert_eq!(packet_no(&frame), 0x0a0b);
        assert_eq!(data_packet_count(&frame), 3);
        assert_eq!(&frame[DATA_HEADER_SIZE..], b"abc");
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(Packet::ConAcc { session_id: 1 }.to_vec().len(), CONACC_SIZE);
        assert_eq!(Packet::ConRjt { session_id: 1 }.to_vec().len(), CONRJT_SIZE);
        assert_eq!(Packet::Rcvd { session_id: 1 }.to_vec().len(), RCVD_SIZE);
        assert_eq!(
            Packet::Acc {
                session_id: 1,
                packet_no: 2
            }
            .to_vec()
            .len(),
            ACC_SIZE
        );
        assert_eq!(
            Packet::Rjt {
                session_id: 1,
                packet_no: 2
            }
            .to_vec()
            .len(),
            RJT_SIZE
        );
    }

    #[test]
    fn test_acc_packet_no_big_endian() {
        let frame = Packet::Acc {
            session_id: 0,
            packet_no: 1,
        }
        .to_vec();

        // Most significant byte first: the 1 lands in the last byte.
        assert_eq!(frame[9..16], [0; 7]);
        assert_eq!(frame[16], 1);
        assert_eq!(packet_no(&frame), 1);
    }

    #[test]
    fn test_peek_on_short_frames() {
        assert_eq!(peek_type(&[]), None);
        assert_eq!(peek_session(&[4; 8]), None);
        assert_eq!(peek_type(&[9]), Some(9));
    }
}
