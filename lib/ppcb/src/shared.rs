use std::io;
use std::time::Duration;

/// Random 64-bit token identifying one transfer end to end.
pub type SessionId = u64;

/// Largest payload a single DATA frame may carry.
pub const MAX_PACKET_COUNT: u32 = 64000;
/// Packet number of the first DATA frame in a session.
pub const START_NO: u64 = 0;
/// Receive scratch buffer size; covers the largest DATA frame (21 + 64000).
pub const BUFFER_SIZE: usize = 65536;
/// Receive inactivity deadline while a session is active.
pub const MAX_WAIT: Duration = Duration::from_secs(5);
/// Bound on resends of any single frame in the retransmitting mode.
pub const MAX_RETRANSMITS: u32 = 3;

pub type NetworkResult<T> = Result<T, ErrorType>;

/// Transport variant negotiated by the CONN packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Stream,
    Datagram,
    DatagramRetrans,
}

impl Mode {
    /// Wire value carried in the CONN `protocol_id` field.
    #[inline]
    pub fn protocol_id(self) -> u8 {
        match self {
            Mode::Stream => 1,
            Mode::Datagram => 2,
            Mode::DatagramRetrans => 3,
        }
    }

    /// Parses a command-line protocol token.
    pub fn from_token(token: &str) -> Option<Mode> {
        match token {
            "tcp" => Some(Mode::Stream),
            "udp" => Some(Mode::Datagram),
            "udpr" => Some(Mode::DatagramRetrans),
            _ => None,
        }
    }

    #[inline]
    pub fn is_datagram(self) -> bool {
        self != Mode::Stream
    }
}

/// Classification of everything that can go wrong while receiving a frame.
///
/// Variants caused by another session carry the foreign session id, so the
/// reject frame answering them can echo it back to the intruder.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    /// CONN from a different session while one is already being served.
    ForeignConn(SessionId),
    /// Any other packet type bearing a session id other than the active one.
    SessionMismatch(SessionId),
    TypeMismatch(u8),
    SizeMismatch(usize),
    ProtocolMismatch(u8),
    PacketNoMismatch(u64),
    PacketCountRange(u32),
    /// Well-formed retransmission of a step the session already advanced past.
    Stale,
    Timeout,
    Io(io::ErrorKind),
}

impl From<io::Error> for ErrorType {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorType::Timeout,
            kind => ErrorType::Io(kind),
        }
    }
}
