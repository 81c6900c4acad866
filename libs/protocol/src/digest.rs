//! Session hash submitted to the session server.

use sha1::{Digest, Sha1};

/// Compute the session hash for a login.
///
/// SHA-1 over `server_id || shared_secret || public_key_der`, with the
/// 20-byte digest read as a big-endian two's-complement integer and printed
/// as lowercase hex. Negative values get a leading `-` and leading zeros are
/// dropped, so the result is not fixed-width.
pub fn session_hash(server_id: &str, shared_secret: &[u8], public_key_der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key_der);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());
    signed_hex(digest)
}

fn signed_hex(mut digest: [u8; 20]) -> String {
    let negative = digest[0] & 0x80 != 0;
    if negative {
        twos_complement(&mut digest);
    }
    let encoded = hex::encode(digest);
    let trimmed = encoded.trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    if negative {
        format!("-{trimmed}")
    } else {
        trimmed.to_owned()
    }
}

fn twos_complement(bytes: &mut [u8]) {
    let mut carry = true;
    for byte in bytes.iter_mut().rev() {
        *byte = !*byte;
        if carry {
            let (value, overflow) = byte.overflowing_add(1);
            *byte = value;
            carry = overflow;
        }
    }
}
