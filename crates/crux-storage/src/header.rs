use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crux_core::{Endian, CRUX_VERSION};

pub const HEADER_LEN: usize = 64;

const MAGIC: [u8; 8] = *b"CRUXMAP\x01";
const HEADER_VERSION: u16 = 1;
const VERSION_STR_LEN: usize = 16;
const PAYLOAD_OFFSET: u32 = HEADER_LEN as u32;

/// Artifact kind identifier embedded in persisted headers.
///
/// These values are part of the on-disk format; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArtifactKind {
    /// Per-file `symbols` table (location → symbol record).
    Symbols = 1,
    /// Per-file `symnames` table (qualified name → locations).
    SymbolNames = 2,
    /// Per-file `targets` table (usr → referencing locations).
    Targets = 3,
    /// Per-file `usrs` table (usr → declaring locations).
    Usrs = 4,
    /// Reserved range for project state artifacts.
    SourcesState = 100,
    /// Dependency graph, visited files and dirty set (`project.bin`).
    ProjectState = 101,
}

impl ArtifactKind {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Symbols),
            2 => Some(Self::SymbolNames),
            3 => Some(Self::Targets),
            4 => Some(Self::Usrs),
            100 => Some(Self::SourcesState),
            101 => Some(Self::ProjectState),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    pub kind: ArtifactKind,
    pub schema_version: u32,
    pub engine_version: String,
    pub endian: Endian,
    pub pointer_width: u8,
    pub payload_offset: u32,
    pub payload_len: u64,
    /// Truncated blake3 hash of the payload (first 8 bytes, LE).
    pub content_hash: u64,
}

impl StorageHeader {
    pub fn new(
        kind: ArtifactKind,
        schema_version: u32,
        payload_len: u64,
        content_hash: u64,
    ) -> Self {
        Self {
            kind,
            schema_version,
            engine_version: CRUX_VERSION.to_owned(),
            endian: crux_core::target_endian(),
            pointer_width: crux_core::target_pointer_width(),
            payload_offset: PAYLOAD_OFFSET,
            payload_len,
            content_hash,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut w = Cursor::new(buf.as_mut_slice());

        w.write_all(&MAGIC).expect("in-memory write");
        w.write_u16::<LittleEndian>(HEADER_VERSION)
            .expect("in-memory write");
        w.write_u16::<LittleEndian>(self.kind as u16)
            .expect("in-memory write");
        w.write_u32::<LittleEndian>(self.schema_version)
            .expect("in-memory write");

        let mut version_bytes = [0u8; VERSION_STR_LEN];
        let version_src = self.engine_version.as_bytes();
        let copy_len = version_src.len().min(VERSION_STR_LEN);
        version_bytes[..copy_len].copy_from_slice(&version_src[..copy_len]);
        w.write_all(&version_bytes).expect("in-memory write");

        w.write_u8(self.endian as u8).expect("in-memory write");
        w.write_u8(self.pointer_width).expect("in-memory write");
        w.write_u16::<LittleEndian>(0).expect("in-memory write"); // flags (reserved)

        w.write_u32::<LittleEndian>(self.payload_offset)
            .expect("in-memory write");
        w.write_u64::<LittleEndian>(self.payload_len)
            .expect("in-memory write");
        w.write_u64::<LittleEndian>(self.content_hash)
            .expect("in-memory write");

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, crate::StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(crate::StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }

        let mut r = Cursor::new(&bytes[..HEADER_LEN]);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(crate::StorageError::InvalidHeader("bad magic"));
        }

        let header_version = r.read_u16::<LittleEndian>()?;
        if header_version != HEADER_VERSION {
            return Err(crate::StorageError::InvalidHeader(
                "unsupported header version",
            ));
        }

        let kind_raw = r.read_u16::<LittleEndian>()?;
        let kind = ArtifactKind::from_u16(kind_raw)
            .ok_or(crate::StorageError::InvalidHeader("unknown artifact kind"))?;

        let schema_version = r.read_u32::<LittleEndian>()?;

        let mut version_bytes = [0u8; VERSION_STR_LEN];
        r.read_exact(&mut version_bytes)?;
        let version_end = version_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(VERSION_STR_LEN);
        let engine_version = String::from_utf8_lossy(&version_bytes[..version_end]).to_string();

        let endian = match r.read_u8()? {
            0 => Endian::Little,
            1 => Endian::Big,
            _ => return Err(crate::StorageError::InvalidHeader("unknown endian tag")),
        };

        let pointer_width = r.read_u8()?;
        let _flags = r.read_u16::<LittleEndian>()?;

        let payload_offset = r.read_u32::<LittleEndian>()?;
        let payload_len = r.read_u64::<LittleEndian>()?;
        let content_hash = r.read_u64::<LittleEndian>()?;

        Ok(Self {
            kind,
            schema_version,
            engine_version,
            endian,
            pointer_width,
            payload_offset,
            payload_len,
            content_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_round_trips() {
        let header = StorageHeader::new(ArtifactKind::Targets, 3, 1234, 0xfeed_f00d);
        let decoded = StorageHeader::decode(&header.encode()).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = StorageHeader::new(ArtifactKind::Symbols, 1, 0, 0).encode();
        bytes[0] = b'X';
        assert!(StorageHeader::decode(&bytes).is_err());
    }
}
