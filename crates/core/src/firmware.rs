use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thumbhost_config::HarnessManifest;

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("failed to read firmware {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware image is {0} bytes, the vector table needs 8")]
    TooShort(usize),
    #[error("reset vector {0:#010x} does not select Thumb state")]
    BadResetVector(u32),
}

/// Source of the image loaded into flash and of its symbol information.
pub trait Firmware {
    /// Raw image bytes, `None` if nothing has been loaded.
    fn buffer(&self) -> Option<&[u8]>;

    /// Name of the function enclosing `address`.
    fn function_at(&self, address: u32) -> Option<&str>;

    /// Re-reads the image from its origin and validates it.
    fn refresh(&mut self) -> Result<(), FirmwareError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Symbol {
    size: u32,
    name: String,
}

/// A flat binary image, optionally backed by a file on disk.
#[derive(Debug, Clone, Default)]
pub struct FirmwareImage {
    path: Option<PathBuf>,
    buffer: Option<Vec<u8>>,
    symbols: BTreeMap<u32, Symbol>,
}

impl FirmwareImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buffer: Some(bytes),
            ..Self::default()
        }
    }

    /// Image loaded lazily from `path` on the first `refresh`.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn from_manifest(manifest: &HarnessManifest, manifest_dir: &Path) -> Self {
        Self::from_file(manifest.firmware_path(manifest_dir))
    }

    /// Registers a function symbol. The Thumb bit of `address` is ignored.
    pub fn add_symbol(&mut self, address: u32, size: u32, name: impl Into<String>) {
        self.symbols.insert(
            address & !1,
            Symbol {
                size,
                name: name.into(),
            },
        );
    }

    pub fn with_symbol(mut self, address: u32, size: u32, name: impl Into<String>) -> Self {
        self.add_symbol(address, size, name);
        self
    }

    fn validate(&self) -> Result<(), FirmwareError> {
        let Some(buffer) = &self.buffer else {
            return Ok(());
        };
        if buffer.len() < 8 {
            return Err(FirmwareError::TooShort(buffer.len()));
        }
        let reset = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
        if reset & 1 == 0 {
            return Err(FirmwareError::BadResetVector(reset));
        }
        Ok(())
    }
}

impl Firmware for FirmwareImage {
    fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    fn function_at(&self, address: u32) -> Option<&str> {
        let (start, symbol) = self.symbols.range(..=address).next_back()?;
        let end = start.checked_add(symbol.size.max(1))?;
        (address < end).then_some(symbol.name.as_str())
    }

    fn refresh(&mut self) -> Result<(), FirmwareError> {
        if let Some(path) = &self.path {
            let bytes = std::fs::read(path).map_err(|source| FirmwareError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::debug!("loaded {} bytes from {:?}", bytes.len(), path);
            self.buffer = Some(bytes);
        }
        self.validate()
    }
}
