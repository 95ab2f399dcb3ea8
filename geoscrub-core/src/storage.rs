//! Persisted index format: `<4-byte metadata length><metadata><payload>`,
//! both parts rkyv-serialized. The metadata can be read without loading
//! the payload, which is how update checks stay cheap.

use std::fs::OpenOptions;
use std::io::{Read, SeekFrom};
use std::path::Path;

use rkyv::rancor::Error as RancorError;
use rkyv::util::AlignedVec;

use crate::{ArchivedEngine, ArchivedEngineMetadata, Engine, EngineMetadata};

#[cfg(feature = "tracing")]
use std::time::Instant;

pub trait IndexStorage {
    /// Serialize an engine.
    fn dump<W>(&self, engine: &Engine, buff: &mut W) -> Result<(), Box<dyn std::error::Error>>
    where
        W: std::io::Write;

    /// Deserialize an engine.
    fn load<R>(&self, buff: &mut R) -> Result<Engine, Box<dyn std::error::Error>>
    where
        R: std::io::Read + std::io::Seek;

    /// Read engine metadata without loading the whole engine.
    fn read_metadata<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Option<EngineMetadata>, Box<dyn std::error::Error>>;

    /// Dump a whole engine to a file.
    fn dump_to<P: AsRef<Path>>(
        &self,
        path: P,
        engine: &Engine,
    ) -> Result<(), Box<dyn std::error::Error>> {
        #[cfg(feature = "tracing")]
        let now = Instant::now();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        self.dump(engine, &mut file)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Dump index to file took {}ms", now.elapsed().as_millis());

        Ok(())
    }

    /// Load a whole engine from a file.
    fn load_from<P: AsRef<Path>>(&self, path: P) -> Result<Engine, Box<dyn std::error::Error>> {
        #[cfg(feature = "tracing")]
        let now = Instant::now();

        let mut file = OpenOptions::new()
            .create(false)
            .read(true)
            .truncate(false)
            .open(&path)?;

        let engine = self.load(&mut file)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Load index from file took {}ms", now.elapsed().as_millis());

        Ok(engine)
    }
}

/// rkyv storage in the len-prefix format.
#[derive(Default)]
pub struct Storage;

impl Storage {
    pub fn new() -> Self {
        Self {}
    }
}

impl IndexStorage for Storage {
    fn dump<W>(&self, engine: &Engine, buff: &mut W) -> Result<(), Box<dyn std::error::Error>>
    where
        W: std::io::Write,
    {
        let metadata = rkyv::to_bytes::<RancorError>(&engine.metadata)?;
        buff.write_all(&(metadata.len() as u32).to_be_bytes())?;
        buff.write_all(&metadata)?;
        let data = rkyv::to_bytes::<RancorError>(engine)?;
        buff.write_all(&data)?;
        Ok(())
    }

    fn load<R>(&self, buff: &mut R) -> Result<Engine, Box<dyn std::error::Error>>
    where
        R: std::io::Read + std::io::Seek,
    {
        // skip the metadata block; the payload carries it as well
        let mut metadata_len = [0; 4];
        buff.read_exact(&mut metadata_len)?;
        let metadata_len = u32::from_be_bytes(metadata_len);
        buff.seek(SeekFrom::Current(metadata_len as i64))?;

        let mut raw = Vec::new();
        buff.read_to_end(&mut raw)?;
        let mut bytes = AlignedVec::<16>::with_capacity(raw.len());
        bytes.extend_from_slice(&raw);

        let archived = rkyv::access::<ArchivedEngine, RancorError>(&bytes[..])?;
        Ok(rkyv::deserialize::<Engine, RancorError>(archived)?)
    }

    fn read_metadata<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Option<EngineMetadata>, Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new()
            .create(false)
            .read(true)
            .truncate(false)
            .open(&path)?;

        let mut metadata_len = [0; 4];
        file.read_exact(&mut metadata_len)?;
        let metadata_len = u32::from_be_bytes(metadata_len);

        let mut raw = vec![0; metadata_len as usize];
        file.read_exact(&mut raw)?;
        let mut bytes = AlignedVec::<16>::with_capacity(raw.len());
        bytes.extend_from_slice(&raw);

        let archived = rkyv::access::<ArchivedEngineMetadata, RancorError>(&bytes[..])?;
        Ok(Some(rkyv::deserialize::<EngineMetadata, RancorError>(
            archived,
        )?))
    }
}
