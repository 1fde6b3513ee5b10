//! Host datastream frame handling
//!
//! Every request and reply exchanged with an IBM i host server travels in a
//! frame with a fixed 12-byte header: total length, service ID, request or
//! reply code, and the correlation ID used to demultiplex shared connections.
//! All header fields are big-endian.

use std::io::{Read, Write};

use crate::error::{TransportError, TransportResult};

// A helper trait alias for objects that implement both Read and Write
pub trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

/// Boxed stream a transport reads and writes
pub type DynStream = Box<dyn ReadWrite + Send>;

/// Size of the fixed frame header in bytes
pub const FRAME_HEADER_LEN: usize = 12;

/// Byte offset of the correlation ID field within a serialized frame
pub const CORRELATION_OFFSET: usize = 8;

/// Upper bound on a declared frame length
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// End-of-session control code, sent before closing a service connection
pub const CODE_END_OF_SESSION: u16 = 0x7FFF;

/// Liveness probe request code
pub const CODE_HEARTBEAT: u16 = 0x7FFE;

/// Compute the reply code for a request code
///
/// Host servers answer a request with the same code plus the high bit set.
pub fn reply_code(request: u16) -> u16 {
    request | 0x8000
}

/// A host server datastream frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Service ID of the host server this frame belongs to
    pub service: u16,
    /// Request or reply code
    pub code: u16,
    /// Correlation ID stamped on the frame
    pub correlation: u32,
    /// Frame payload following the header
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with correlation ID zero (stamped at send time)
    pub fn new(service: u16, code: u16, payload: Vec<u8>) -> Self {
        Self {
            service,
            code,
            correlation: 0,
            payload,
        }
    }

    /// Total serialized length of this frame, header included
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Serialize the frame, header fields big-endian
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.wire_len());
        result.extend_from_slice(&(self.wire_len() as u32).to_be_bytes());
        result.extend_from_slice(&self.service.to_be_bytes());
        result.extend_from_slice(&self.code.to_be_bytes());
        result.extend_from_slice(&self.correlation.to_be_bytes());
        result.extend_from_slice(&self.payload);
        result
    }

    /// Parse a frame from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if length < FRAME_HEADER_LEN || length > bytes.len() {
            return None;
        }

        let service = u16::from_be_bytes([bytes[4], bytes[5]]);
        let code = u16::from_be_bytes([bytes[6], bytes[7]]);
        let correlation = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let payload = bytes[FRAME_HEADER_LEN..length].to_vec();

        Some(Self {
            service,
            code,
            correlation,
            payload,
        })
    }

    /// Patch the correlation ID field of an already serialized frame
    ///
    /// The correlation ID sits at a fixed header offset so the transport can
    /// stamp it after the frame body has been built.
    pub fn set_correlation_in(buf: &mut [u8], correlation: u32) {
        buf[CORRELATION_OFFSET..CORRELATION_OFFSET + 4]
            .copy_from_slice(&correlation.to_be_bytes());
    }

    /// Read exactly one frame from a blocking stream
    ///
    /// Blocks until a full frame is available. A declared length outside
    /// protocol bounds means the stream is desynchronized and is reported as
    /// an invalid-length error rather than read through.
    pub fn read_from(reader: &mut dyn ReadWrite) -> TransportResult<Self> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header)?;

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length < FRAME_HEADER_LEN || length > MAX_FRAME_LEN {
            return Err(TransportError::InvalidFrameLength {
                length,
                max: MAX_FRAME_LEN,
            });
        }

        let mut payload = vec![0u8; length - FRAME_HEADER_LEN];
        reader.read_exact(&mut payload)?;

        Ok(Self {
            service: u16::from_be_bytes([header[4], header[5]]),
            code: u16::from_be_bytes([header[6], header[7]]),
            correlation: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let mut frame = Frame::new(0xE009, 0x7002, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        frame.correlation = 42;

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 4);

        let parsed = Frame::from_bytes(&bytes).expect("frame should parse");
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_correlation_patch() {
        let frame = Frame::new(0xE000, 0x1234, vec![1, 2, 3]);
        let mut bytes = frame.to_bytes();
        assert_eq!(bytes[CORRELATION_OFFSET..CORRELATION_OFFSET + 4], [0, 0, 0, 0]);

        Frame::set_correlation_in(&mut bytes, 0x01020304);
        let parsed = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.correlation, 0x01020304);
    }

    #[test]
    fn test_read_from_stream() {
        let mut frame = Frame::new(0xE004, 0x1801, vec![9; 32]);
        frame.correlation = 7;
        let bytes = frame.to_bytes();

        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = Frame::read_from(&mut cursor).expect("read should succeed");
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_read_rejects_undersized_length() {
        // Declared length smaller than the header itself
        let mut bytes = Frame::new(0xE000, 1, vec![]).to_bytes();
        bytes[0..4].copy_from_slice(&4u32.to_be_bytes());

        let mut cursor = std::io::Cursor::new(bytes);
        match Frame::read_from(&mut cursor) {
            Err(TransportError::InvalidFrameLength { length, .. }) => assert_eq!(length, 4),
            other => panic!("expected InvalidFrameLength, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let frame = Frame::new(0xE002, 0x2001, vec![1, 2, 3, 4, 5]);
        let bytes = frame.to_bytes();
        assert!(Frame::from_bytes(&bytes[..bytes.len() - 1]).is_none());
        assert!(Frame::from_bytes(&bytes[..8]).is_none());
    }

    #[test]
    fn test_reply_code() {
        assert_eq!(reply_code(0x7002), 0xF002);
        assert_eq!(reply_code(CODE_HEARTBEAT), 0xFFFE);
    }
}
