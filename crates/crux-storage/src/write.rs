use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::header::{ArtifactKind, StorageHeader};
use crate::persisted::StorageError;

/// Serializes `value` and writes it under the crux container header,
/// atomically (write-to-temp + rename).
pub fn write_archive_atomic<T>(
    path: &Path,
    kind: ArtifactKind,
    schema_version: u32,
    value: &T,
) -> Result<(), StorageError>
where
    T: rkyv::Archive + rkyv::Serialize<rkyv::ser::serializers::AllocSerializer<256>>,
{
    let dir = path
        .parent()
        .ok_or(StorageError::InvalidHeader("missing parent directory"))?;
    fs::create_dir_all(dir)?;

    let archived =
        rkyv::to_bytes::<_, 256>(value).map_err(|e| StorageError::Validation(e.to_string()))?;
    let payload = archived.as_slice();

    let header = StorageHeader::new(
        kind,
        schema_version,
        payload.len() as u64,
        content_hash(payload),
    );

    atomic_write(path, &header.encode(), payload)
}

pub(crate) fn content_hash(payload: &[u8]) -> u64 {
    let hash_bytes = blake3::hash(payload);
    u64::from_le_bytes(hash_bytes.as_bytes()[..8].try_into().expect("hash slice"))
}

fn atomic_write(dest: &Path, header: &[u8], payload: &[u8]) -> Result<(), StorageError> {
    let tmp_path = dest.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(header)?;
        file.write_all(payload)?;
        file.sync_all()?;
    }

    match fs::rename(&tmp_path, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists || dest.exists() => {
            // On Windows, rename doesn't overwrite. Try remove + rename.
            let _ = fs::remove_file(dest);
            fs::rename(&tmp_path, dest).map_err(StorageError::from)
        }
        Err(err) => Err(StorageError::from(err)),
    }
}
