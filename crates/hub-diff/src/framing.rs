//! `HDF1` diff-file framing: a self-describing binary format whose first
//! bytes declare version and algorithm, replacing a generic pickled
//! format. A frame is: 4-byte magic `b"HDF1"`, 1-byte algorithm tag
//! (`0` = patch-only, `1` = self-contained), a little-endian `u32`
//! payload length, the JSON payload, then a trailing 16-byte MD5 digest
//! of the payload -- so the checksum travels with the frame as well as
//! in `metadata.json`.

use hub_models::diff::{DiffFile, DiffVariant};

const MAGIC: &[u8; 4] = b"HDF1";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short")]
    Truncated,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unknown algorithm tag {0}")]
    UnknownAlgo(u8),
    #[error("payload length mismatch: header said {expected}, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("MD5 checksum mismatch")]
    ChecksumMismatch,
    #[error("payload is not valid JSON")]
    Json(#[source] serde_json::Error),
}

fn algo_tag(variant: DiffVariant) -> u8 {
    match variant {
        DiffVariant::PatchOnly => 0,
        DiffVariant::SelfContained => 1,
    }
}

fn variant_from_tag(tag: u8) -> Result<DiffVariant, FrameError> {
    match tag {
        0 => Ok(DiffVariant::PatchOnly),
        1 => Ok(DiffVariant::SelfContained),
        other => Err(FrameError::UnknownAlgo(other)),
    }
}

/// Serializes `file` into an `HDF1` frame, returning the bytes and the
/// MD5 hex digest of the payload.
pub fn encode(file: &DiffFile, variant: DiffVariant) -> anyhow::Result<(Vec<u8>, String)> {
    let payload = serde_json::to_vec(file)?;
    let digest = md5::compute(&payload);

    let mut out = Vec::with_capacity(4 + 1 + 4 + payload.len() + 16);
    out.extend_from_slice(MAGIC);
    out.push(algo_tag(variant));
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&digest.0);
    Ok((out, format!("{digest:x}")))
}

/// Parses an `HDF1` frame, verifying magic, declared length, and the
/// trailing MD5 checksum.
pub fn decode(bytes: &[u8]) -> Result<(DiffVariant, DiffFile), FrameError> {
    if bytes.len() < 4 + 1 + 4 + 16 {
        return Err(FrameError::Truncated);
    }
    if &bytes[0..4] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let variant = variant_from_tag(bytes[4])?;
    let len = u32::from_le_bytes(bytes[5..9].try_into().expect("4 bytes"));
    let payload_start = 9;
    let payload_end = payload_start + len as usize;
    if bytes.len() < payload_end + 16 {
        return Err(FrameError::LengthMismatch {
            expected: len,
            actual: bytes.len().saturating_sub(payload_start + 16),
        });
    }
    let payload = &bytes[payload_start..payload_end];
    let trailer = &bytes[payload_end..payload_end + 16];
    let digest = md5::compute(payload);
    if digest.0.as_slice() != trailer {
        return Err(FrameError::ChecksumMismatch);
    }
    let file = serde_json::from_slice(payload).map_err(FrameError::Json)?;
    Ok((variant, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_models::diff::AddEntries;

    fn sample() -> DiffFile {
        DiffFile {
            add: AddEntries::Ids(vec!["a".into()]),
            delete: vec!["b".into()],
            update: vec![],
            source: "demo".into(),
            timestamp: chrono::Utc::now(),
            synced: Default::default(),
        }
    }

    #[test]
    fn round_trips_a_frame() {
        let file = sample();
        let (bytes, digest) = encode(&file, DiffVariant::PatchOnly).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        let (variant, decoded) = decode(&bytes).unwrap();
        assert_eq!(variant, DiffVariant::PatchOnly);
        assert_eq!(decoded.source, "demo");
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn rejects_tampered_payload() {
        let file = sample();
        let (mut bytes, _) = encode(&file, DiffVariant::SelfContained).unwrap();
        let last = bytes.len() - 17;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(FrameError::ChecksumMismatch)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![0u8; 64];
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(FrameError::BadMagic)));
    }
}
