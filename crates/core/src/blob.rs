//! Content-addressed blob storage with compression

use crate::error::StoreError;
use crate::hash::{hash_bytes, Digest};
use dashmap::{DashMap, DashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Content-addressable storage: digest -> bytes
///
/// `put` is idempotent: identical bytes yield the same digest and are stored once.
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their digest
    fn put(&self, data: &[u8]) -> Result<Digest, StoreError>;

    /// Fetch the bytes a digest was computed from
    fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError>;

    /// Check whether content for a digest is present
    fn contains(&self, digest: &Digest) -> bool;
}

/// Blob header format (version 1)
#[derive(Debug, Clone)]
pub struct BlobHeaderV1 {
    /// Magic bytes: "CLB1"
    pub magic: [u8; 4],
    /// Flags: bit0=compressed, bit1-7=reserved
    pub flags: u8,
    /// Original size (before compression)
    pub orig_len: u64,
    /// Stored size (after compression, if compressed)
    pub stored_len: u64,
}

impl BlobHeaderV1 {
    const MAGIC: [u8; 4] = *b"CLB1";
    const FLAG_COMPRESSED: u8 = 0b0000_0001;
    pub const LEN: usize = 21;

    pub fn new(orig_len: u64, stored_len: u64, compressed: bool) -> Self {
        let flags = if compressed { Self::FLAG_COMPRESSED } else { 0 };
        Self {
            magic: Self::MAGIC,
            flags,
            orig_len,
            stored_len,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & Self::FLAG_COMPRESSED) != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.magic);
        bytes.push(self.flags);
        bytes.extend_from_slice(&self.orig_len.to_le_bytes());
        bytes.extend_from_slice(&self.stored_len.to_le_bytes());
        bytes
    }

    /// Parse a header, returning a human-readable reason on failure
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < Self::LEN {
            return Err(format!(
                "header too short: expected at least {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != Self::MAGIC {
            return Err(format!("bad magic {:?}", magic));
        }

        let mut orig = [0u8; 8];
        orig.copy_from_slice(&bytes[5..13]);
        let mut stored = [0u8; 8];
        stored.copy_from_slice(&bytes[13..21]);

        Ok(Self {
            magic,
            flags: bytes[4],
            orig_len: u64::from_le_bytes(orig),
            stored_len: u64::from_le_bytes(stored),
        })
    }
}

/// Metadata about a stored blob
#[derive(Debug, Clone)]
pub struct Blob {
    pub digest: Digest,
    pub size: u64,
    pub compressed: bool,
}

impl Blob {
    /// Encode bytes as header + (possibly compressed) payload
    ///
    /// Payloads larger than `compression_threshold` are zstd-compressed when
    /// that actually shrinks them.
    pub fn encode(data: &[u8], compression_threshold: usize) -> (Self, Vec<u8>) {
        let digest = hash_bytes(data);
        let orig_len = data.len() as u64;

        let compressed_data = if data.len() > compression_threshold {
            zstd::encode_all(data, 3)
                .ok()
                .filter(|compressed| compressed.len() < data.len())
        } else {
            None
        };

        let compressed = compressed_data.is_some();
        let payload = compressed_data.unwrap_or_else(|| data.to_vec());

        let header = BlobHeaderV1::new(orig_len, payload.len() as u64, compressed);
        let mut serialized = header.to_bytes();
        serialized.extend_from_slice(&payload);

        (
            Blob {
                digest,
                size: orig_len,
                compressed,
            },
            serialized,
        )
    }

    /// Decode header + payload back to the original bytes
    pub fn decode(digest: Digest, serialized: &[u8]) -> Result<Vec<u8>, StoreError> {
        let header =
            BlobHeaderV1::from_bytes(serialized).map_err(|reason| StoreError::corrupt(digest, reason))?;

        let data_end = usize::try_from(header.stored_len)
            .ok()
            .and_then(|len| len.checked_add(BlobHeaderV1::LEN))
            .filter(|&end| end <= serialized.len())
            .ok_or_else(|| {
                StoreError::corrupt(
                    digest,
                    format!(
                        "payload truncated: header claims {} bytes, {} available",
                        header.stored_len,
                        serialized.len().saturating_sub(BlobHeaderV1::LEN)
                    ),
                )
            })?;

        let stored = &serialized[BlobHeaderV1::LEN..data_end];
        let data = if header.is_compressed() {
            zstd::decode_all(stored).map_err(|e| StoreError::corrupt(digest, e.to_string()))?
        } else {
            stored.to_vec()
        };

        if data.len() as u64 != header.orig_len {
            return Err(StoreError::corrupt(
                digest,
                format!("size mismatch: expected {} bytes, got {}", header.orig_len, data.len()),
            ));
        }

        Ok(data)
    }
}

/// On-disk blob storage
///
/// Layout: `<root>/objects/blobs/<first 2 hex>/<remaining 62 hex>`
pub struct BlobStore {
    root: PathBuf,
    /// Digests written by this process
    known: DashSet<Digest>,
    compression_threshold: usize,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            known: DashSet::new(),
            compression_threshold: 4096,
        }
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.root.join("objects").join("blobs").join(prefix).join(rest)
    }

    fn write_atomically(&self, digest: &Digest, serialized: &[u8]) -> Result<(), StoreError> {
        use std::fs;
        use std::io::Write;

        let blob_path = self.blob_path(digest);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_dir = self.root.join("tmp").join("ingest");
        fs::create_dir_all(&tmp_dir)?;
        let temp_path = tmp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), digest.to_hex()));

        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(serialized)?;
        temp_file.sync_all()?;
        drop(temp_file);

        fs::rename(&temp_path, &blob_path)?;

        if let Some(parent) = blob_path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all(); // best effort, not supported everywhere
            }
        }

        Ok(())
    }
}

impl ContentStore for BlobStore {
    fn put(&self, data: &[u8]) -> Result<Digest, StoreError> {
        let digest = hash_bytes(data);
        if self.contains(&digest) {
            return Ok(digest);
        }

        let (blob, serialized) = Blob::encode(data, self.compression_threshold);
        self.write_atomically(&digest, &serialized)?;
        self.known.insert(digest);

        tracing::trace!(digest = %digest.short(), size = data.len(), compressed = blob.compressed, "stored blob");
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        let serialized = match std::fs::read(self.blob_path(digest)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*digest));
            }
            Err(e) => return Err(e.into()),
        };

        let data = Blob::decode(*digest, &serialized)?;

        let actual = hash_bytes(&data);
        if actual != *digest {
            return Err(StoreError::corrupt(*digest, format!("content hashes to {}", actual)));
        }

        Ok(data)
    }

    fn contains(&self, digest: &Digest) -> bool {
        self.known.contains(digest) || self.blob_path(digest).exists()
    }
}

/// In-memory content store
#[derive(Default)]
pub struct MemoryStore {
    blobs: DashMap<Digest, Arc<[u8]>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<Digest, StoreError> {
        let digest = hash_bytes(data);
        self.blobs.entry(digest).or_insert_with(|| Arc::from(data));
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(digest)
            .map(|blob| blob.to_vec())
            .ok_or(StoreError::NotFound(*digest))
    }

    fn contains(&self, digest: &Digest) -> bool {
        self.blobs.contains_key(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_header_serialization() {
        let header = BlobHeaderV1::new(1000, 500, true);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), BlobHeaderV1::LEN);

        let parsed = BlobHeaderV1::from_bytes(&bytes).unwrap();
        assert_eq!(header.orig_len, parsed.orig_len);
        assert_eq!(header.stored_len, parsed.stored_len);
        assert!(parsed.is_compressed());
    }

    #[test]
    fn test_blob_header_rejects_bad_magic_and_length() {
        let mut bytes = BlobHeaderV1::new(10, 10, false).to_bytes();
        bytes[0..4].copy_from_slice(b"BADM");
        assert!(BlobHeaderV1::from_bytes(&bytes).is_err());
        assert!(BlobHeaderV1::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_small_blob_not_compressed() {
        let data = b"hello world";
        let (blob, serialized) = Blob::encode(data, 4096);
        assert!(!blob.compressed);
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(Blob::decode(blob.digest, &serialized).unwrap(), data);
    }

    #[test]
    fn test_large_blob_compressed() {
        let data = b"hello world ".repeat(1000);
        let (blob, serialized) = Blob::encode(&data, 4096);
        assert!(blob.compressed);
        assert!(serialized.len() < data.len());
        assert_eq!(Blob::decode(blob.digest, &serialized).unwrap(), data);
    }

    #[test]
    fn test_decode_truncated_payload_is_corrupt() {
        let (blob, serialized) = Blob::encode(b"some content here", 4096);
        let truncated = &serialized[..serialized.len() - 3];
        assert!(matches!(
            Blob::decode(blob.digest, truncated),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_decode_oversized_length_is_corrupt() {
        let mut serialized = BlobHeaderV1::new(4, u64::MAX, false).to_bytes();
        serialized.extend_from_slice(b"data");
        let digest = hash_bytes(b"data");
        assert!(matches!(
            Blob::decode(digest, &serialized),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_blob_store_put_get() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = BlobStore::new(temp_dir.path().to_path_buf());

        let data = b"test data for blob store";
        let digest = store.put(data)?;
        assert_eq!(digest, hash_bytes(data));
        assert_eq!(store.get(&digest)?, data);
        Ok(())
    }

    #[test]
    fn test_blob_store_put_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = BlobStore::new(temp_dir.path().to_path_buf());

        let first = store.put(b"same bytes")?;
        let second = store.put(b"same bytes")?;
        assert_eq!(first, second);

        let hex = first.to_hex();
        let shard = temp_dir.path().join("objects").join("blobs").join(&hex[0..2]);
        assert_eq!(std::fs::read_dir(shard)?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_blob_store_missing_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf());
        let missing = Digest::from_bytes([0xFF; 32]);

        assert!(!store.contains(&missing));
        assert!(matches!(store.get(&missing), Err(StoreError::NotFound(d)) if d == missing));
    }

    #[test]
    fn test_blob_store_detects_tampering() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = BlobStore::new(temp_dir.path().to_path_buf());
        let digest = store.put(b"original")?;

        let (_, forged) = Blob::encode(b"tampered", 4096);
        std::fs::write(store.blob_path(&digest), forged)?;

        assert!(matches!(store.get(&digest), Err(StoreError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn test_blob_store_empty_blob() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = BlobStore::new(temp_dir.path().to_path_buf());
        let digest = store.put(b"")?;
        assert!(store.get(&digest)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_memory_store_dedups() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let a = store.put(b"chunk")?;
        let b = store.put(b"chunk")?;
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a)?, b"chunk");
        assert!(matches!(
            store.get(&hash_bytes(b"other")),
            Err(StoreError::NotFound(_))
        ));
        Ok(())
    }
}
