//! Device binary container
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! ┌────────┬─────────┬──────────────────┬────────────────┬─────────────────────┐
//! │ "NDRB" │ version │ device           │ payload length │ payload             │
//! │ 4 B    │ u16     │ fingerprint u64  │ u64            │ bincode module      │
//! └────────┴─────────┴──────────────────┴────────────────┴─────────────────────┘
//! ```
//!
//! The fingerprint ties a binary to the device family that produced it; a
//! device refuses binaries carrying another fingerprint.

use crate::isa::CompiledModule;

/// Container magic
pub const BINARY_MAGIC: [u8; 4] = *b"NDRB";

/// Current container format version
pub const BINARY_FORMAT_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_LEN: usize = 4 + 2 + 8 + 8;

/// Reasons a device binary is rejected
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BinaryError {
    #[error("binary is {0} bytes, shorter than the {HEADER_LEN}-byte header")]
    Truncated(usize),

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported binary format version {0}")]
    UnsupportedVersion(u16),

    #[error("binary built for device fingerprint {found:#018x}, device expects {expected:#018x}")]
    DeviceMismatch { expected: u64, found: u64 },

    #[error("header declares {declared} payload bytes, binary carries {actual}")]
    LengthMismatch { declared: u64, actual: usize },

    #[error("payload does not decode: {0}")]
    Payload(String),

    #[error("module does not encode: {0}")]
    Encode(String),
}

/// Wrap a compiled module in a device binary
pub fn encode(module: &CompiledModule, fingerprint: u64) -> Result<Vec<u8>, BinaryError> {
    let payload = module.to_bytes().map_err(|e| BinaryError::Encode(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&BINARY_MAGIC);
    bytes.extend_from_slice(&BINARY_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&fingerprint.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Unwrap a device binary produced for `expected_fingerprint`
pub fn decode(bytes: &[u8], expected_fingerprint: u64) -> Result<CompiledModule, BinaryError> {
    if bytes.len() < HEADER_LEN {
        return Err(BinaryError::Truncated(bytes.len()));
    }

    let magic: [u8; 4] = bytemuck::pod_read_unaligned(&bytes[0..4]);
    if magic != BINARY_MAGIC {
        return Err(BinaryError::BadMagic(magic));
    }

    let version = u16::from_le(bytemuck::pod_read_unaligned(&bytes[4..6]));
    if version != BINARY_FORMAT_VERSION {
        return Err(BinaryError::UnsupportedVersion(version));
    }

    let fingerprint = u64::from_le(bytemuck::pod_read_unaligned(&bytes[6..14]));
    if fingerprint != expected_fingerprint {
        return Err(BinaryError::DeviceMismatch {
            expected: expected_fingerprint,
            found: fingerprint,
        });
    }

    let declared = u64::from_le(bytemuck::pod_read_unaligned(&bytes[14..22]));
    let payload = &bytes[HEADER_LEN..];
    if declared != payload.len() as u64 {
        return Err(BinaryError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    CompiledModule::from_bytes(payload).map_err(|e| BinaryError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    const FINGERPRINT: u64 = 0x0123_4567_89ab_cdef;

    fn module() -> CompiledModule {
        compile("__kernel void k(__global int *out) { out[get_global_id(0)] = 3; }").unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&module(), FINGERPRINT).unwrap();
        assert_eq!(&bytes[0..4], b"NDRB");
        assert_eq!(&bytes[4..6], &1u16.to_le_bytes());
        assert_eq!(&bytes[6..14], &FINGERPRINT.to_le_bytes());
        assert_eq!(
            u64::from_le_bytes(bytes[14..22].try_into().unwrap()),
            (bytes.len() - HEADER_LEN) as u64
        );
        assert_eq!(decode(&bytes, FINGERPRINT).unwrap(), module());
    }

    #[test]
    fn test_rejections() {
        let bytes = encode(&module(), FINGERPRINT).unwrap();

        assert_eq!(decode(&bytes[..10], FINGERPRINT), Err(BinaryError::Truncated(10)));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(decode(&bad_magic, FINGERPRINT), Err(BinaryError::BadMagic(_))));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert_eq!(decode(&bad_version, FINGERPRINT), Err(BinaryError::UnsupportedVersion(9)));

        assert!(matches!(
            decode(&bytes, FINGERPRINT ^ 1),
            Err(BinaryError::DeviceMismatch { .. })
        ));

        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            decode(truncated, FINGERPRINT),
            Err(BinaryError::LengthMismatch { .. })
        ));

        let mut garbage = bytes[..HEADER_LEN].to_vec();
        garbage[14..22].copy_from_slice(&4u64.to_le_bytes());
        garbage.extend_from_slice(&[0xFF; 4]);
        assert!(matches!(decode(&garbage, FINGERPRINT), Err(BinaryError::Payload(_))));
    }
}
