//! Payload generation for broker stress tests.
//!
//! Every generated message of at least [`TIMESTAMP_LEN`] bytes starts with its
//! creation time, encoded as little-endian nanoseconds since the UNIX epoch,
//! so the receiving side can compute transit latency from the payload alone.

mod stream;

pub use stream::MessageStream;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;

/// Printable alphabet used to fill message bodies.
pub const MESSAGE_CHARACTERS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_!@#$%^&*(),./;'\"";

/// Width of the embedded creation timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Generate a message of exactly `size` bytes using the thread-local RNG.
pub fn generate_message(size: usize) -> Bytes {
    generate_message_with(&mut rand::rng(), size)
}

/// Generate a message of exactly `size` bytes drawing characters from `rng`.
///
/// The timestamp is taken after the body is filled so it is as close as
/// possible to the moment the message leaves the generator.
pub fn generate_message_with<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Bytes {
    let mut msg: Vec<u8> = (0..size)
        .map(|_| MESSAGE_CHARACTERS[rng.random_range(0..MESSAGE_CHARACTERS.len())])
        .collect();

    if size >= TIMESTAMP_LEN {
        msg[..TIMESTAMP_LEN].copy_from_slice(&unix_nanos(SystemTime::now()).to_le_bytes());
    }
    Bytes::from(msg)
}

/// Creation time embedded in `msg`, as a duration since the UNIX epoch.
///
/// Payloads shorter than [`TIMESTAMP_LEN`] carry no timestamp and yield zero.
pub fn extract_timestamp(msg: &[u8]) -> Duration {
    match msg.first_chunk::<TIMESTAMP_LEN>() {
        Some(raw) => Duration::from_nanos(u64::from_le_bytes(*raw)),
        None => Duration::ZERO,
    }
}

/// Whether `msg` is long enough to carry a creation timestamp.
pub fn has_timestamp(msg: &[u8]) -> bool {
    msg.len() >= TIMESTAMP_LEN
}

/// Time elapsed between the timestamp embedded in `msg` and `received_at`.
///
/// Saturates at zero when clocks disagree.
pub fn transit_latency(msg: &[u8], received_at: SystemTime) -> Duration {
    let received = received_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    received.saturating_sub(extract_timestamp(msg))
}

fn unix_nanos(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now_since_epoch() -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap()
    }

    #[test]
    fn test_generate_message_exact_size() {
        for size in [0, 1, 7, 8, 9, 50, 4096] {
            assert_eq!(generate_message(size).len(), size);
        }
    }

    #[test]
    fn test_timestamp_close_to_wall_clock() {
        for size in [8, 9, 50, 1000] {
            let msg = generate_message(size);
            let drift = now_since_epoch().abs_diff(extract_timestamp(&msg));
            assert!(drift < Duration::from_millis(1), "size {size}: drift {drift:?}");
        }
    }

    #[test]
    fn test_short_messages_have_no_timestamp() {
        for size in 0..TIMESTAMP_LEN {
            let msg = generate_message(size);
            assert!(!has_timestamp(&msg));
            assert_eq!(extract_timestamp(&msg), Duration::ZERO);
        }
    }

    #[test]
    fn test_body_uses_message_alphabet() {
        let msg = generate_message(200);
        assert!(msg[TIMESTAMP_LEN..]
            .iter()
            .all(|b| MESSAGE_CHARACTERS.contains(b)));

        let short = generate_message(TIMESTAMP_LEN - 1);
        assert!(short.iter().all(|b| MESSAGE_CHARACTERS.contains(b)));
    }

    #[test]
    fn test_transit_latency() {
        let msg = generate_message(16);
        let sent = extract_timestamp(&msg);
        let received_at = UNIX_EPOCH + sent + Duration::from_millis(25);
        assert_eq!(transit_latency(&msg, received_at), Duration::from_millis(25));

        // A receive clock behind the sender saturates instead of underflowing.
        let earlier = UNIX_EPOCH + sent - Duration::from_millis(5);
        assert_eq!(transit_latency(&msg, earlier), Duration::ZERO);
    }
}
