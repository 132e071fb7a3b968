//! Base64 conventions for the x402 wire: the `X-PAYMENT` header carries the
//! raw transaction bytes, and `X-PAYMENT-RESPONSE` carries a JSON settlement
//! receipt, both encoded with the standard alphabet including padding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decode a standard-alphabet base64 string into raw bytes.
pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(input)
}

/// Encode raw bytes as a standard-alphabet base64 string.
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    STANDARD.encode(input.as_ref())
}
