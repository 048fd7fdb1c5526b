//! Fuzz target for STUN message decoding
//!
//! Tests that the decoder handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use portcullis_stun::StunMessage;

fuzz_target!(|data: &[u8]| {
    // The decoder should never panic, only return Ok or Err. A message
    // that decodes must also re-encode without panicking.
    if let Ok(message) = StunMessage::decode(data) {
        let _ = message.encode();
    }
});
