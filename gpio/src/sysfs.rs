//! Legacy sysfs GPIO interface, used only to make lines visible under `/sys/class/gpio`.
use crate::{GpioError, GpioResult};
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

pub struct SysfsExporter {
    base_path: PathBuf,
}

impl SysfsExporter {
    pub fn new() -> Self {
        Self::with_base_path("/sys/class/gpio")
    }

    pub fn with_base_path(base_path: impl AsRef<Path>) -> Self {
        SysfsExporter {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn pin_path(&self, index: usize) -> PathBuf {
        self.base_path.join(format!("gpio{}", index))
    }

    pub fn is_exported(&self, index: usize) -> bool {
        self.pin_path(index).exists()
    }

    /// Writes the pin number to `export`. Exporting an already exported pin is not an error.
    pub fn export(&self, index: usize) -> GpioResult<()> {
        if self.is_exported(index) {
            debug!("Pin {} already exported", index);
            return Ok(());
        }
        let export_path = self.base_path.join("export");
        std::fs::write(&export_path, index.to_string()).map_err(|err| {
            warn!("Writing {:?} failed: {}", export_path, err);
            GpioError::Export(index)
        })
    }

    /// Writes the pin number to `unexport`. Unexporting a pin that is not exported does nothing.
    pub fn unexport(&self, index: usize) -> GpioResult<()> {
        if !self.is_exported(index) {
            return Ok(());
        }
        let unexport_path = self.base_path.join("unexport");
        std::fs::write(&unexport_path, index.to_string())?;
        Ok(())
    }
}

impl Default for SysfsExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SysfsExporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SysfsExporter({:?})", self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gardenpi-sysfs-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn export_writes_pin_number() {
        let dir = scratch_dir("export");
        let exporter = SysfsExporter::with_base_path(&dir);

        exporter.export(17).unwrap();

        assert_eq!(fs::read_to_string(dir.join("export")).unwrap(), "17");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn already_exported_pin_is_left_alone() {
        let dir = scratch_dir("exported");
        fs::create_dir(dir.join("gpio4")).unwrap();
        let exporter = SysfsExporter::with_base_path(&dir);

        exporter.export(4).unwrap();
        assert!(!dir.join("export").exists());

        exporter.unexport(4).unwrap();
        assert_eq!(fs::read_to_string(dir.join("unexport")).unwrap(), "4");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_sysfs_reports_export_error() {
        let exporter = SysfsExporter::with_base_path("/nonexistent/gardenpi/gpio");
        assert_eq!(exporter.export(3), Err(GpioError::Export(3)));
        assert_eq!(exporter.unexport(3), Ok(()));
    }
}
