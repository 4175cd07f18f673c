//! Persistent store facade (component D).
//!
//! Addresses six named regions with a CRC-protected, whole-record write
//! discipline. The simulation backend persists one file per region; the
//! flight NVM backend (not implemented in this workspace — the hardware
//! abstraction layer is out of scope) would back the same trait with
//! sector writes. Both must accept identical byte images.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The six named persistence regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    MissionData,
    EpsConfig,
    SensorConfig,
    FaultLog,
    Backup,
    SystemState,
}

impl Region {
    pub const ALL: [Region; 6] = [
        Region::MissionData,
        Region::EpsConfig,
        Region::SensorConfig,
        Region::FaultLog,
        Region::Backup,
        Region::SystemState,
    ];

    fn file_name(self) -> &'static str {
        match self {
            Region::MissionData => "mission_data.dat",
            Region::EpsConfig => "eps_config.dat",
            Region::SensorConfig => "sensor_config.dat",
            Region::FaultLog => "fault_log.dat",
            Region::Backup => "backup.dat",
            Region::SystemState => "system_state.dat",
        }
    }
}

/// Backend contract a region store implements. The core depends only on
/// this interface, never on a concrete file or NVM type.
pub trait PersistBackend: Send {
    fn read(&self, region: Region, offset: usize, buf: &mut [u8]) -> CoreResult<()>;
    fn write(&mut self, region: Region, offset: usize, buf: &[u8]) -> CoreResult<()>;
    fn erase(&mut self, region: Region) -> CoreResult<()>;
    fn size(&self, region: Region) -> usize;
    /// Always `false` for the backends implemented here; named for parity
    /// with a flight NVM backend that may need to poll between writes.
    fn busy(&self) -> bool {
        false
    }
    fn wear_level(&self, region: Region) -> u32;
}

/// File-per-region backend rooted at a configurable directory.
pub struct FileBackend {
    root: PathBuf,
    wear: HashMap<Region, u32>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(Self { root, wear: HashMap::new() })
    }

    fn path(&self, region: Region) -> PathBuf {
        self.root.join(region.file_name())
    }
}

impl PersistBackend for FileBackend {
    fn read(&self, region: Region, offset: usize, buf: &mut [u8]) -> CoreResult<()> {
        let data = fs::read(self.path(region)).map_err(|_| CoreError::NotFound)?;
        let end = offset.checked_add(buf.len()).ok_or(CoreError::Truncated)?;
        if end > data.len() {
            return Err(CoreError::Truncated);
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write(&mut self, region: Region, offset: usize, buf: &[u8]) -> CoreResult<()> {
        let path = self.path(region);
        let mut data = fs::read(&path).unwrap_or_default();
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        fs::write(&path, &data).map_err(|e| CoreError::Io(e.to_string()))?;
        *self.wear.entry(region).or_insert(0) += 1;
        Ok(())
    }

    fn erase(&mut self, region: Region) -> CoreResult<()> {
        let path = self.path(region);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| CoreError::Io(e.to_string()))?;
        }
        *self.wear.entry(region).or_insert(0) += 1;
        Ok(())
    }

    fn size(&self, region: Region) -> usize {
        fs::metadata(self.path(region)).map(|m| m.len() as usize).unwrap_or(0)
    }

    fn wear_level(&self, region: Region) -> u32 {
        *self.wear.get(&region).unwrap_or(&0)
    }
}

/// In-memory backend for tests, mirroring [`FileBackend`]'s semantics
/// without touching the filesystem.
#[derive(Default)]
pub struct MemoryBackend {
    regions: HashMap<Region, Vec<u8>>,
    wear: HashMap<Region, u32>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistBackend for MemoryBackend {
    fn read(&self, region: Region, offset: usize, buf: &mut [u8]) -> CoreResult<()> {
        let data = self.regions.get(&region).ok_or(CoreError::NotFound)?;
        let end = offset.checked_add(buf.len()).ok_or(CoreError::Truncated)?;
        if end > data.len() {
            return Err(CoreError::Truncated);
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write(&mut self, region: Region, offset: usize, buf: &[u8]) -> CoreResult<()> {
        let data = self.regions.entry(region).or_default();
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        *self.wear.entry(region).or_insert(0) += 1;
        Ok(())
    }

    fn erase(&mut self, region: Region) -> CoreResult<()> {
        self.regions.remove(&region);
        *self.wear.entry(region).or_insert(0) += 1;
        Ok(())
    }

    fn size(&self, region: Region) -> usize {
        self.regions.get(&region).map(Vec::len).unwrap_or(0)
    }

    fn wear_level(&self, region: Region) -> u32 {
        *self.wear.get(&region).unwrap_or(&0)
    }
}

/// Writes a whole-record image to `region`: overwrite semantics (erase
/// then write), matching the owner-serializes/erase/write discipline.
pub fn save_record(backend: &mut dyn PersistBackend, region: Region, image: &[u8]) -> CoreResult<()> {
    backend.erase(region)?;
    backend.write(region, 0, image)
}

/// Reads the whole region into a freshly sized buffer, or `NotFound` if
/// the region has never been written.
pub fn load_record(backend: &dyn PersistBackend, region: Region) -> CoreResult<Vec<u8>> {
    let len = backend.size(region);
    if len == 0 {
        return Err(CoreError::NotFound);
    }
    let mut buf = vec![0u8; len];
    backend.read(region, 0, &mut buf)?;
    Ok(buf)
}

/// Validates that `root` is usable before handing a [`FileBackend`] out,
/// mirroring the original's preference for a configurable directory over
/// a hardcoded `/tmp` path.
pub fn file_backend_at(root: impl AsRef<Path>) -> CoreResult<FileBackend> {
    FileBackend::new(root.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_round_trips_exact_bytes() {
        let mut backend = MemoryBackend::new();
        let image = vec![1u8, 2, 3, 4, 5];
        save_record(&mut backend, Region::SystemState, &image).unwrap();
        let loaded = load_record(&backend, Region::SystemState).unwrap();
        assert_eq!(loaded, image);
    }

    #[test]
    fn unread_region_is_not_found() {
        let backend = MemoryBackend::new();
        assert_eq!(load_record(&backend, Region::FaultLog), Err(CoreError::NotFound));
    }

    #[test]
    fn wear_level_increments_per_write() {
        let mut backend = MemoryBackend::new();
        save_record(&mut backend, Region::EpsConfig, &[0u8; 4]).unwrap();
        save_record(&mut backend, Region::EpsConfig, &[1u8; 4]).unwrap();
        assert_eq!(backend.wear_level(Region::EpsConfig), 4);
    }

    #[test]
    fn file_backend_round_trips_via_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path()).unwrap();
        let image = vec![9u8, 8, 7, 6];
        save_record(&mut backend, Region::MissionData, &image).unwrap();
        let loaded = load_record(&backend, Region::MissionData).unwrap();
        assert_eq!(loaded, image);
    }

    #[test]
    fn busy_is_always_false() {
        let backend = MemoryBackend::new();
        assert!(!backend.busy());
    }
}
