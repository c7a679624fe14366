//! The `G` pseudo-random function used for priority-neighbor selection:
//! `G(i, round, name) = SHA-256(XDR(slot) || XDR(i) || XDR(round) || XDR(name))`,
//! interpreted as a big-endian integer. See spec.md §6 and the `Gi` method
//! in the original `Node.py` this was distilled from.

use sha2::{Digest, Sha256};

/// Minimal XDR encoder: big-endian 4-byte ints, length-prefixed
/// zero-padded-to-4-bytes byte strings. Framing must stay bit-exact across
/// reimplementations so PRNG draws agree for identical inputs.
struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn pack_int(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn pack_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(b);
        let padding = (4 - (b.len() % 4)) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(padding));
    }
}

pub type GHash = [u8; 32];

/// `G(i, round, name)` for the current slot.
pub fn g(slot: u64, i: u32, round: u64, name: &str) -> GHash {
    let mut xdr = XdrWriter::new();
    xdr.pack_int(slot as i32);
    xdr.pack_int(i as i32);
    xdr.pack_int(round as i32);
    xdr.pack_bytes(name.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(&xdr.buf);
    hasher.finalize().into()
}

/// Projects a 256-bit hash onto `[0, 1)` using its leading 8 bytes. With a
/// cryptographic hash the remaining 24 bytes add negligible precision, so
/// this keeps threshold comparisons (`G < 2^256 * weight`) simple floating
/// point comparisons rather than requiring a big-integer dependency outside
/// the teacher's stack (see DESIGN.md).
pub fn unit_interval(hash: &GHash) -> f64 {
    let mut be = [0u8; 8];
    be.copy_from_slice(&hash[..8]);
    (u64::from_be_bytes(be) as f64) / (u64::MAX as f64 + 1.0)
}

/// `G(i, round, name) < 2^256 * weight`.
pub fn below_weight(hash: &GHash, weight: f64) -> bool {
    unit_interval(hash) < weight
}
