//! UART wire format.

use crate::error::{Error, Result};
use crate::protocol::packet::{Framing, PacketType, encode_body};

/// Encode a UART frame.
///
/// Fails when the payload does not fit the one byte length field.
pub fn encode(packet_type: PacketType, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > Framing::Uart.max_payload() {
        return Err(Error::Protocol(format!(
            "{packet_type} payload of {} bytes exceeds the UART limit of {}",
            payload.len(),
            Framing::Uart.max_payload()
        )));
    }
    Ok(encode_body(Framing::Uart, packet_type, payload))
}
