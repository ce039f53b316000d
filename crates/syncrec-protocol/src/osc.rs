//! Minimal OSC 1.0 message encoding.
//!
//! The transport target only ever receives argument-less messages, so this
//! encodes an address pattern followed by an empty type-tag string. Both
//! strings are NUL-terminated and padded to a multiple of four bytes.

use syncrec_core::TransportAction;

/// Encodes the OSC message that triggers `action` on the transport target.
pub fn encode_action(action: TransportAction) -> Vec<u8> {
    encode_address(&action.osc_address())
}

fn encode_address(address: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(address.len() + 8);
    push_padded_str(&mut packet, address);
    push_padded_str(&mut packet, ",");
    packet
}

fn push_padded_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    // At least one terminating NUL, then pad to 4-byte alignment.
    let padding = 4 - (s.len() % 4);
    buf.extend(std::iter::repeat(0u8).take(padding));
}
