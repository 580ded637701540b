//! Wire frame codec.
//!
//! ```text
//! +--------+------+-------------+----------+-----------------------+
//! | source | type | declaredLen | sequence | payload (declared - 1)|
//! +--------+------+-------------+----------+-----------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::cipher::{CipherError, PayloadCipher};

pub const HEADER_LEN: usize = 4;
/// Largest payload that fits one frame, after encryption.
pub const MAX_PAYLOAD_LEN: usize = 251;
pub const MAX_DECLARED_LEN: usize = MAX_PAYLOAD_LEN + 1;
/// Device id 0 is reserved for the gateway.
pub const GATEWAY_DEVICE_ID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x01,
    Response = 0x02,
    Ack = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Data),
            0x02 => Ok(FrameType::Response),
            0x03 => Ok(FrameType::Ack),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than the 4 byte header")]
    TooShort(usize),

    #[error("declared length 0 is invalid")]
    ZeroLength,

    #[error("truncated frame: header declares {declared} payload bytes, {available} present")]
    Truncated { declared: usize, available: usize },

    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),

    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload cipher: {0}")]
    Cipher(#[from] CipherError),
}

impl FrameError {
    /// True for malformed input, as opposed to encryption or caller errors.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            FrameError::TooShort(_)
                | FrameError::ZeroLength
                | FrameError::Truncated { .. }
                | FrameError::UnknownType(_)
        )
    }
}

/// A decoded frame. `payload` is plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: u8,
    pub frame_type: FrameType,
    pub sequence: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    cipher: Option<PayloadCipher>,
}

impl FrameCodec {
    pub fn new(cipher: Option<PayloadCipher>) -> Self {
        Self { cipher }
    }

    pub fn plaintext() -> Self {
        Self::default()
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Largest plaintext payload `encode` accepts.
    pub fn max_plaintext_len(&self) -> usize {
        match self.cipher {
            Some(_) => (MAX_PAYLOAD_LEN / crate::cipher::BLOCK_SIZE) * crate::cipher::BLOCK_SIZE - 1,
            None => MAX_PAYLOAD_LEN,
        }
    }

    pub fn encode(
        &self,
        source: u8,
        frame_type: FrameType,
        sequence: u8,
        payload: &[u8],
    ) -> Result<Bytes, FrameError> {
        let sealed;
        let body = match &self.cipher {
            Some(cipher) => {
                sealed = cipher.encrypt(payload)?;
                sealed.as_slice()
            }
            None => payload,
        };

        if body.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: body.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u8(source);
        buf.put_u8(frame_type as u8);
        buf.put_u8((body.len() + 1) as u8);
        buf.put_u8(sequence);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }

        let declared = bytes[2] as usize;
        if declared == 0 {
            return Err(FrameError::ZeroLength);
        }
        let payload_len = declared - 1;
        let available = bytes.len() - HEADER_LEN;
        if available < payload_len {
            return Err(FrameError::Truncated {
                declared: payload_len,
                available,
            });
        }

        let frame_type = FrameType::try_from(bytes[1])?;
        let body = &bytes[HEADER_LEN..HEADER_LEN + payload_len];
        let payload = match &self.cipher {
            Some(cipher) => Bytes::from(cipher.decrypt(body)?),
            None => Bytes::copy_from_slice(body),
        };

        Ok(Frame {
            source: bytes[0],
            frame_type,
            sequence: bytes[3],
            payload,
        })
    }
}
