//! Bounded request-reply and tolerant-receive loops shared by every
//! retransmission path (client CONN and DATA, server CONACC and ACC).
//!
//! Both loops take the protocol context by parameter so the send, receive
//! and policy closures can all reach the same session state.

use crate::shared::{ErrorType, NetworkResult};
use std::time::{Duration, Instant};

/// How a failed receive inside a retransmission loop is handled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// Keep waiting for the current send; no retransmission consumed.
    Free,
    /// Consume one retransmission and send again.
    Consume,
    /// Abort the loop with the observed error.
    Abort,
}

/// Receives until `recv` succeeds or `max_wait` elapses, ignoring failures
/// `tolerate` marks as harmless. Once the wall clock expires, any failure
/// is reported as `Timeout` — a stream of tolerated frames cannot keep the
/// wait alive past the deadline.
pub fn recv_within<C, T>(
    ctx: &mut C,
    max_wait: Duration,
    mut recv: impl FnMut(&mut C) -> NetworkResult<T>,
    mut tolerate: impl FnMut(&mut C, ErrorType) -> bool,
) -> NetworkResult<T> {
    let start = Instant::now();
    loop {
        match recv(ctx) {
            Ok(reply) => return Ok(reply),
            Err(mut err) => {
                if start.elapsed() >= max_wait {
                    err = ErrorType::Timeout;
                }
                if !tolerate(ctx, err) {
                    return Err(err);
                }
            }
        }
    }
}

/// Re-sends the initiating frame and waits for the expected reply, up to
/// `max_retransmits` sends. Each send gets its own `max_wait` wall clock;
/// `policy` decides which receive failures burn a retransmission, which are
/// waited out for free and which abort the exchange. Exhausting the budget
/// reports `Timeout`.
pub fn request_reply<C, T>(
    ctx: &mut C,
    max_retransmits: u32,
    max_wait: Duration,
    mut send: impl FnMut(&mut C) -> NetworkResult<()>,
    mut recv: impl FnMut(&mut C) -> NetworkResult<T>,
    mut policy: impl FnMut(&mut C, ErrorType) -> Verdict,
) -> NetworkResult<T> {
    let mut spent = 0;
    while spent < max_retransmits {
        send(ctx)?;
        let sent_at = Instant::now();
        loop {
            match recv(ctx) {
                Ok(reply) => return Ok(reply),
                Err(mut err) => {
                    if sent_at.elapsed() >= max_wait {
                        err = ErrorType::Timeout;
                    }
                    match policy(ctx, err) {
                        Verdict::Free => continue,
                        Verdict::Consume => {
                            spent += 1;
                            break;
                        }
                        Verdict::Abort => return Err(err),
                    }
                }
            }
        }
    }
    Err(ErrorType::Timeout)
}
