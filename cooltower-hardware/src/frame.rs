//! Modbus RTU framing
//!
//! Builds request frames and validates response frames for the two function
//! codes the supervisor uses. The CRC is CRC-16/Modbus (reflected polynomial
//! 0xA001, initial value 0xFFFF) and travels little-endian on the wire.

use cooltower_core::protocol::EXCEPTION_FLAG;
use cooltower_core::{CoolTowerError, ExceptionCode, FunctionCode, Result};

/// Shortest valid response: address, function, one byte, CRC
pub const MIN_RESPONSE_LEN: usize = 5;

/// Length of an exception response
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

/// Length of every request frame and of a write echo
pub const REQUEST_LEN: usize = 8;

/// Most registers one read may request
pub const MAX_READ_COUNT: u16 = 125;

/// Compute the CRC-16/Modbus of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` in wire order (low byte first).
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing CRC of a complete frame.
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let body = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body], frame[body + 1]]);
    crc16(&frame[..body]) == received
}

/// Encode a register value in wire order (big-endian).
pub fn encode_register(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Decode a register value from wire order.
pub fn decode_register(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// A single read or write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub function: FunctionCode,
    /// Starting register address
    pub register: u16,
    /// Register count for reads, value for writes
    pub value: u16,
}

impl Request {
    pub fn read(device_id: u8, register: u16, count: u16) -> Self {
        Self {
            device_id,
            function: FunctionCode::ReadHoldingRegisters,
            register,
            value: count,
        }
    }

    pub fn write(device_id: u8, register: u16, value: u16) -> Self {
        Self {
            device_id,
            function: FunctionCode::WriteSingleRegister,
            register,
            value,
        }
    }

    /// Serialize to `[id][fc][regHi][regLo][valHi][valLo][crcLo][crcHi]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(REQUEST_LEN);
        frame.push(self.device_id);
        frame.push(self.function.code());
        frame.extend_from_slice(&encode_register(self.register));
        frame.extend_from_slice(&encode_register(self.value));
        append_crc(&mut frame);
        frame
    }

    /// Size of the normal (non-exception) response.
    pub fn expected_response_len(&self) -> usize {
        match self.function {
            FunctionCode::ReadHoldingRegisters => 5 + 2 * self.value as usize,
            FunctionCode::WriteSingleRegister => REQUEST_LEN,
        }
    }
}

/// Decoded payload of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Register values from a read
    Registers(Vec<u16>),
    /// Echo of a single register write
    WriteAck { register: u16, value: u16 },
}

/// Whether `buffer` holds a complete response to a request expecting
/// `expected` bytes. Exception responses complete early.
pub fn is_complete(buffer: &[u8], expected: usize) -> bool {
    if buffer.len() >= EXCEPTION_RESPONSE_LEN && buffer[1] & EXCEPTION_FLAG != 0 {
        return true;
    }
    buffer.len() >= expected
}

/// Validate `response` against `request` and decode its payload.
///
/// Checks run in order: minimum length, CRC, exception flag, then the
/// address, function code, and payload shape.
pub fn parse_response(request: &Request, response: &[u8]) -> Result<Response> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(CoolTowerError::Timeout(format!(
            "incomplete response from device {}: {} bytes",
            request.device_id,
            response.len()
        )));
    }

    if !verify_crc(response) {
        return Err(CoolTowerError::Frame(format!(
            "CRC mismatch in {}-byte response from device {}",
            response.len(),
            request.device_id
        )));
    }

    if response[1] & EXCEPTION_FLAG != 0 {
        return Err(CoolTowerError::ProtocolException {
            device_id: request.device_id,
            code: ExceptionCode::from_code(response[2]),
        });
    }

    if response[0] != request.device_id {
        return Err(CoolTowerError::Frame(format!(
            "response from device {} to a request for device {}",
            response[0], request.device_id
        )));
    }
    if response[1] != request.function.code() {
        return Err(CoolTowerError::Frame(format!(
            "function code 0x{:02X} in response to 0x{:02X}",
            response[1],
            request.function.code()
        )));
    }

    match request.function {
        FunctionCode::ReadHoldingRegisters => {
            let byte_count = response[2] as usize;
            let expected_bytes = 2 * request.value as usize;
            if byte_count != expected_bytes {
                return Err(CoolTowerError::Frame(format!(
                    "byte count {} for {} registers",
                    byte_count, request.value
                )));
            }
            if response.len() != 3 + byte_count + 2 {
                return Err(CoolTowerError::Frame(format!(
                    "response length {} does not match byte count {}",
                    response.len(),
                    byte_count
                )));
            }
            let registers = response[3..3 + byte_count]
                .chunks_exact(2)
                .map(|pair| decode_register([pair[0], pair[1]]))
                .collect();
            Ok(Response::Registers(registers))
        }
        FunctionCode::WriteSingleRegister => {
            if response.len() != REQUEST_LEN {
                return Err(CoolTowerError::Frame(format!(
                    "write echo of {} bytes",
                    response.len()
                )));
            }
            let register = decode_register([response[2], response[3]]);
            let value = decode_register([response[4], response[5]]);
            if register != request.register || value != request.value {
                return Err(CoolTowerError::Frame(format!(
                    "write echo 0x{:04X}=0x{:04X} does not match request 0x{:04X}=0x{:04X}",
                    register, value, request.register, request.value
                )));
            }
            Ok(Response::WriteAck { register, value })
        }
    }
}

/// Hex dump for frame logging
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_known_crc_values() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]), 0x0B98);
        assert_eq!(crc16(&[0x01, 0x83, 0x02]), 0xF1C0);
    }

    #[test]
    fn test_request_layout() {
        let bytes = Request::read(0x01, 0x0000, 1).to_bytes();
        assert_eq!(bytes, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);

        let bytes = Request::write(0x03, 0x2000, 0x0001).to_bytes();
        assert_eq!(&bytes[..6], &[0x03, 0x06, 0x20, 0x00, 0x00, 0x01]);
        assert!(verify_crc(&bytes));
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(Request::read(1, 0x2100, 3).expected_response_len(), 11);
        assert_eq!(Request::read(1, 0x3000, 1).expected_response_len(), 7);
        assert_eq!(Request::write(1, 0x2000, 1).expected_response_len(), 8);
    }

    #[test]
    fn test_parse_read_response() {
        let request = Request::read(1, 0x2100, 3);
        let response = with_crc(&[0x01, 0x03, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(
            parse_response(&request, &response).unwrap(),
            Response::Registers(vec![0x0001, 0x0000, 0x0007])
        );
    }

    #[test]
    fn test_parse_write_echo() {
        let request = Request::write(2, 0x2001, 3000);
        let response = request.to_bytes();
        assert_eq!(
            parse_response(&request, &response).unwrap(),
            Response::WriteAck {
                register: 0x2001,
                value: 3000
            }
        );
    }

    #[test]
    fn test_mismatched_echo_is_frame_error() {
        let request = Request::write(2, 0x2001, 3000);
        let response = Request::write(2, 0x2001, 2999).to_bytes();
        assert!(matches!(
            parse_response(&request, &response),
            Err(CoolTowerError::Frame(_))
        ));
    }

    #[test]
    fn test_short_response_is_timeout() {
        let request = Request::read(1, 0x3000, 1);
        assert!(matches!(
            parse_response(&request, &[0x01, 0x03]),
            Err(CoolTowerError::Timeout(_))
        ));
        assert!(matches!(
            parse_response(&request, &[]),
            Err(CoolTowerError::Timeout(_))
        ));
    }

    #[test]
    fn test_bad_crc_is_frame_error() {
        let request = Request::read(1, 0x3000, 1);
        let mut response = with_crc(&[0x01, 0x03, 0x02, 0x13, 0x88]);
        response[3] ^= 0x01;
        assert!(matches!(
            parse_response(&request, &response),
            Err(CoolTowerError::Frame(_))
        ));
    }

    #[test]
    fn test_exception_response() {
        let request = Request::read(1, 0x9999, 1);
        let response = with_crc(&[0x01, 0x83, 0x02]);
        assert!(is_complete(&response, request.expected_response_len()));
        match parse_response(&request, &response) {
            Err(CoolTowerError::ProtocolException { device_id, code }) => {
                assert_eq!(device_id, 1);
                assert_eq!(code, ExceptionCode::IllegalDataAddress);
            }
            other => panic!("Expected ProtocolException, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_device_is_frame_error() {
        let request = Request::read(1, 0x3000, 1);
        let response = with_crc(&[0x02, 0x03, 0x02, 0x13, 0x88]);
        assert!(matches!(
            parse_response(&request, &response),
            Err(CoolTowerError::Frame(_))
        ));
    }

    #[test]
    fn test_byte_count_mismatch() {
        let request = Request::read(1, 0x2100, 3);
        let response = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x01]);
        assert!(matches!(
            parse_response(&request, &response),
            Err(CoolTowerError::Frame(_))
        ));
    }

    #[test]
    fn test_is_complete() {
        assert!(!is_complete(&[0x01, 0x03, 0x02], 7));
        assert!(is_complete(&[0x01, 0x03, 0x02, 0x00, 0x01, 0xAA, 0xBB], 7));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex(&[0x01, 0xAB]), "01 AB");
    }
}
