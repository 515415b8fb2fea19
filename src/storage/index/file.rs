#![forbid(unsafe_code)]

use tracing::debug;

use super::RecordIndex;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::io::Location;
use crate::storage::record::RecordFactory;
use crate::types::checksum::crc32_chunks;
use crate::types::{Result, TdbError};

const INDEX_MAGIC: [u8; 4] = *b"TDBI";
const INDEX_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 28;

/// Checkpoint image of a [`RecordIndex`]: header, records in key order, crc32.
///
/// The header carries a caller-defined `version` (the commit version for
/// tuple indexes, the covered object-file length for the node index).
#[derive(Clone, Debug)]
pub struct IndexFile {
    location: Location,
    file_name: String,
}

impl IndexFile {
    /// Snapshot file `<name>.idx` at `location`.
    pub fn new(location: Location, name: &str) -> Self {
        Self {
            location,
            file_name: format!("{name}.idx"),
        }
    }

    /// File name within the location.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Writes a snapshot atomically.
    pub fn store(&self, version: u64, index: &RecordIndex) -> Result<()> {
        let factory = index.factory();
        let key_len = u16::try_from(factory.key_len()).map_err(|_| TdbError::Invalid("key too long"))?;
        let value_len =
            u16::try_from(factory.value_len()).map_err(|_| TdbError::Invalid("value too long"))?;
        let mut buf = Vec::with_capacity(HEADER_LEN + index.len() * factory.record_len() + 4);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_FORMAT_VERSION.to_be_bytes());
        buf.extend_from_slice(&key_len.to_be_bytes());
        buf.extend_from_slice(&value_len.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&version.to_be_bytes());
        buf.extend_from_slice(&(index.len() as u64).to_be_bytes());
        for record in index.iter() {
            buf.extend_from_slice(record.key());
            buf.extend_from_slice(record.value());
        }
        let crc = crc32_chunks(&[&buf]);
        buf.extend_from_slice(&crc.to_be_bytes());
        self.location.write_atomic(&self.file_name, &buf)?;
        debug!(file = %self.file_name, version, records = index.len(), "index_file.store");
        Ok(())
    }

    /// Loads a snapshot; `None` if the file does not exist yet.
    pub fn load(&self, factory: RecordFactory) -> Result<Option<(u64, RecordIndex)>> {
        let Some(bytes) = self.location.read_file(&self.file_name)? else {
            return Ok(None);
        };
        let corrupt = |reason: &'static str| TdbError::CorruptionAt {
            file: self.file_name.clone(),
            offset: 0,
            reason,
        };
        if bytes.len() < HEADER_LEN + 4 {
            return Err(corrupt("index file truncated"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32_chunks(&[body]) != stored_crc {
            return Err(corrupt("index file crc mismatch"));
        }
        let mut cur = Cursor::new(body);
        if cur.take(4)? != INDEX_MAGIC {
            return Err(corrupt("index magic mismatch"));
        }
        if cur.u16_be()? != INDEX_FORMAT_VERSION {
            return Err(corrupt("index format version mismatch"));
        }
        let key_len = usize::from(cur.u16_be()?);
        let value_len = usize::from(cur.u16_be()?);
        let _reserved = cur.u16_be()?;
        if key_len != factory.key_len() || value_len != factory.value_len() {
            return Err(corrupt("index record shape mismatch"));
        }
        let version = cur.u64_be()?;
        let count = cur.u64_be()?;
        if cur.remaining() as u64 != count * factory.record_len() as u64 {
            return Err(corrupt("index record count mismatch"));
        }
        let mut index = RecordIndex::new(factory);
        for _ in 0..count {
            let key = cur.take(key_len)?;
            let value = cur.take(value_len)?;
            index.insert(factory.create(key, value)?)?;
        }
        debug!(file = %self.file_name, version, records = count, "index_file.load");
        Ok(Some((version, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_load_roundtrip() -> Result<()> {
        let location = Location::mem();
        let file = IndexFile::new(location.clone(), "SPO");
        let factory = RecordFactory::new(2, 1);
        assert!(file.load(factory)?.is_none());

        let mut index = RecordIndex::new(factory);
        index.insert(factory.create(&[1, 2], &[3])?)?;
        index.insert(factory.create(&[0, 9], &[4])?)?;
        file.store(42, &index)?;

        let (version, loaded) = file.load(factory)?.expect("snapshot present");
        assert_eq!(version, 42);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.find(&[1, 2]).unwrap().value(), &[3]);
        Ok(())
    }

    #[test]
    fn damaged_snapshot_is_rejected() -> Result<()> {
        let location = Location::mem();
        let file = IndexFile::new(location.clone(), "POS");
        let factory = RecordFactory::new(1, 0);
        let mut index = RecordIndex::new(factory);
        index.insert(factory.create(&[7], &[])?)?;
        file.store(1, &index)?;

        let mut bytes = location.read_file("POS.idx")?.unwrap();
        bytes[HEADER_LEN] ^= 0x01;
        location.write_atomic("POS.idx", &bytes)?;
        assert!(matches!(file.load(factory), Err(TdbError::CorruptionAt { .. })));
        assert!(file.load(RecordFactory::new(2, 0)).is_err());
        Ok(())
    }
}
