// Storage collaborator contract and a RAM-backed implementation
//
// The agent never touches flash directly; the embedding application
// supplies the open/read/write/close/verify/validate surface. A write
// failure is never retried within the same cycle because resuming a
// partial image write is not guaranteed to be safe.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::version::FirmwareVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    OpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    NotOpen,
    VerifyFailed(String),
    ValidateFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(msg) => write!(f, "open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "write failed: {}", msg),
            StorageError::NotOpen => write!(f, "storage not open"),
            StorageError::VerifyFailed(msg) => write!(f, "verify failed: {}", msg),
            StorageError::ValidateFailed(msg) => write!(f, "validate failed: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Flash-side collaborator for one update image.
pub trait OtaStorage: Send {
    fn open(&mut self, app_id: u8) -> Result<(), StorageError>;

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;

    /// Integrity check of the fully written image.
    fn verify(&mut self) -> Result<bool, StorageError>;

    /// Mark the image in `app_id` as valid so the bootloader will not
    /// revert it.
    fn validate_image(&mut self, app_id: u8) -> Result<(), StorageError>;

    /// Version of the currently running application.
    fn app_info(&self) -> Result<FirmwareVersion, StorageError>;
}

/// Firmware images larger than this fail the size sanity check.
const MAX_IMAGE_SIZE: usize = 4 * 1024 * 1024;

/// RAM-backed storage for host use and tests. `verify` hashes the image
/// with SHA-256 and compares against an expected digest when one is set.
pub struct MemoryStorage {
    image: Vec<u8>,
    open: bool,
    app_version: FirmwareVersion,
    expected_sha256: Option<[u8; 32]>,
}

impl MemoryStorage {
    pub fn new(app_version: FirmwareVersion) -> Self {
        Self {
            image: Vec::new(),
            open: false,
            app_version,
            expected_sha256: None,
        }
    }

    pub fn set_expected_sha256(&mut self, digest: [u8; 32]) {
        self.expected_sha256 = Some(digest);
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl OtaStorage for MemoryStorage {
    fn open(&mut self, _app_id: u8) -> Result<(), StorageError> {
        self.image.clear();
        self.open = true;
        Ok(())
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        let offset = offset as usize;
        if offset >= self.image.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.image.len() - offset);
        buf[..n].copy_from_slice(&self.image[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        let offset = offset as usize;
        let end = offset + data.len();
        if end > MAX_IMAGE_SIZE {
            return Err(StorageError::WriteFailed(format!(
                "write past {} byte image limit",
                MAX_IMAGE_SIZE
            )));
        }
        if end > self.image.len() {
            self.image.resize(end, 0xff);
        }
        self.image[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.open = false;
        Ok(())
    }

    fn verify(&mut self) -> Result<bool, StorageError> {
        if self.image.is_empty() {
            return Err(StorageError::VerifyFailed("no image written".to_string()));
        }
        let digest: [u8; 32] = Sha256::digest(&self.image).into();
        match self.expected_sha256 {
            Some(expected) => Ok(digest == expected),
            None => Ok(true),
        }
    }

    fn validate_image(&mut self, _app_id: u8) -> Result<(), StorageError> {
        Ok(())
    }

    fn app_info(&self) -> Result<FirmwareVersion, StorageError> {
        Ok(self.app_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn writes_assemble_out_of_order_chunks() {
        let mut storage = MemoryStorage::new(FirmwareVersion::new(1, 0, 0));
        storage.open(0).unwrap();
        storage.write(4, b"world").unwrap();
        storage.write(0, b"hell").unwrap();
        assert_eq!(storage.image(), b"hellworld");
    }

    #[test]
    fn write_requires_open() {
        let mut storage = MemoryStorage::new(FirmwareVersion::new(1, 0, 0));
        assert_eq!(storage.write(0, b"x"), Err(StorageError::NotOpen));
    }

    #[test]
    fn verify_checks_expected_digest() {
        let mut storage = MemoryStorage::new(FirmwareVersion::new(1, 0, 0));
        storage.open(0).unwrap();
        storage.write(0, b"firmware image").unwrap();
        storage.set_expected_sha256(Sha256::digest(b"firmware image").into());
        assert!(storage.verify().unwrap());

        storage.set_expected_sha256([0u8; 32]);
        assert!(!storage.verify().unwrap());
    }

    #[test]
    fn verify_rejects_empty_image() {
        let mut storage = MemoryStorage::new(FirmwareVersion::new(1, 0, 0));
        storage.open(0).unwrap();
        assert!(matches!(
            storage.verify(),
            Err(StorageError::VerifyFailed(_))
        ));
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut storage = MemoryStorage::new(FirmwareVersion::new(1, 0, 0));
        storage.open(0).unwrap();
        let result = storage.write(MAX_IMAGE_SIZE as u64, b"x");
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));
    }
}
