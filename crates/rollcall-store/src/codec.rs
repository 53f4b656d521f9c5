//! Embedding vector ↔ BLOB codec.
//!
//! Vectors are stored as packed little-endian f32 bytes.

use rollcall_core::Embedding;

pub fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a BLOB back into a vector. Trailing bytes that do not form a
/// whole f32 indicate corruption and are rejected.
pub fn blob_to_embedding(blob: &[u8]) -> Option<Embedding> {
    if blob.len() % 4 != 0 {
        return None;
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Embedding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let e = Embedding::new(vec![0.25, -1.5, 3.75]);
        let blob = embedding_to_blob(&e);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_embedding(&blob), Some(e));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert_eq!(blob_to_embedding(&[0, 0, 0]), None);
    }

    #[test]
    fn test_empty_blob() {
        assert_eq!(blob_to_embedding(&[]), Some(Embedding::new(vec![])));
    }
}
