use crate::events::DetectionEvent;
use crate::traits::DetectionStore;
use anyhow::{anyhow, Context};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only JSON-lines file of detections, one object per line.
pub struct JsonlDetectionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlDetectionLog {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening detection log {}", path.display()))?;

        Ok(JsonlDetectionLog {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DetectionStore for JsonlDetectionLog {
    fn record(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("detection log lock poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}
