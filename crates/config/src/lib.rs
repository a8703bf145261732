use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";
pub const MAX_VERBOSITY: u8 = 2;
pub const DEFAULT_CYCLE_BUDGET: u64 = 1_000_000;

fn default_ram_size() -> String {
    "192 KiB".to_string()
}

fn default_cycle_budget() -> u64 {
    DEFAULT_CYCLE_BUDGET
}

/// Describes one harness run: which image to load and how the simulated
/// console and controller are configured.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HarnessManifest {
    pub schema_version: String,
    pub firmware: String,
    #[serde(default = "default_ram_size")]
    pub ram_size: String, // e.g. "192 KiB"
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget: u64,
    /// Bytes queued on the input register before the first step.
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub write_to_stdout: bool,
    #[serde(default)]
    pub verbose: u8,
}

impl HarnessManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open harness manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Harness Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Harness Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        if self.firmware.trim().is_empty() {
            anyhow::bail!("Input 'firmware' path cannot be empty");
        }

        if self.cycle_budget == 0 {
            anyhow::bail!("Limit 'cycle_budget' must be greater than zero");
        }

        if self.verbose > MAX_VERBOSITY {
            anyhow::bail!(
                "Verbosity {} out of range (0..={})",
                self.verbose,
                MAX_VERBOSITY
            );
        }

        self.ram_size_bytes()?;
        Ok(())
    }

    pub fn ram_size_bytes(&self) -> Result<u32> {
        let bytes = parse_size(&self.ram_size)
            .with_context(|| format!("Invalid 'ram_size' value '{}'", self.ram_size))?;
        u32::try_from(bytes).context("'ram_size' does not fit in 32 bits")
    }

    /// Firmware path resolved against the directory holding the manifest.
    pub fn firmware_path(&self, manifest_dir: &Path) -> PathBuf {
        let path = Path::new(&self.firmware);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            manifest_dir.join(path)
        }
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
