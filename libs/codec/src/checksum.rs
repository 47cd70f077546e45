//! Comm verification for CD1.1 frames
//!
//! The comm verification value occupies the final 8 bytes of every frame and
//! covers the whole frame with those 8 bytes taken as zero. The value is a
//! CRC32 widened into the 64-bit trailer field.

use crate::frame::COMM_VERIFICATION_SIZE;

const ZEROED_FIELD: [u8; COMM_VERIFICATION_SIZE] = [0; COMM_VERIFICATION_SIZE];

/// Compute the comm verification value for a complete encoded frame
///
/// Frames shorter than the verification field hash as if entirely zeroed.
pub fn compute_comm_verification(frame: &[u8]) -> u64 {
    let body_len = frame.len().saturating_sub(COMM_VERIFICATION_SIZE);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&frame[..body_len]);
    hasher.update(&ZEROED_FIELD);
    u64::from(hasher.finalize())
}

/// Read the comm verification value stored in a frame's trailer
pub fn stored_comm_verification(frame: &[u8]) -> Option<u64> {
    let start = frame.len().checked_sub(COMM_VERIFICATION_SIZE)?;
    let mut field = [0u8; COMM_VERIFICATION_SIZE];
    field.copy_from_slice(&frame[start..]);
    Some(u64::from_be_bytes(field))
}

/// Check a frame's stored comm verification against a fresh computation
pub fn verify_comm_verification(frame: &[u8]) -> bool {
    match stored_comm_verification(frame) {
        Some(stored) => stored == compute_comm_verification(frame),
        None => false,
    }
}

/// Compute and write the comm verification value into the frame's final 8 bytes
pub fn embed_comm_verification(frame: &mut [u8]) {
    let Some(start) = frame.len().checked_sub(COMM_VERIFICATION_SIZE) else {
        return;
    };
    let value = compute_comm_verification(frame);
    frame[start..].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_then_verify() {
        let mut frame = vec![0xAB; 64];
        assert!(!verify_comm_verification(&frame));

        embed_comm_verification(&mut frame);
        assert!(verify_comm_verification(&frame));

        frame[3] ^= 0x01;
        assert!(!verify_comm_verification(&frame));
    }

    #[test]
    fn test_stored_field_does_not_affect_computation() {
        let mut a = vec![7u8; 40];
        let mut b = a.clone();
        a[32..].fill(0x11);
        b[32..].fill(0x99);
        assert_eq!(compute_comm_verification(&a), compute_comm_verification(&b));
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(stored_comm_verification(&[1, 2, 3]), None);
        assert!(!verify_comm_verification(&[1, 2, 3]));
    }
}
