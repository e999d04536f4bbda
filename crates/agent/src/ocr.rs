use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use tutorbot_core::config::OcrConfig;

#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Raw text recognised in the image; `None` when nothing was found.
    async fn extract_text(&self, image_path: &Path) -> Result<Option<String>>;
}

/// Runs the `tesseract` binary and reads the recognised text from stdout.
#[derive(Clone, Debug)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), language: language.into(), timeout }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(&config.tesseract_path, &config.language, Duration::from_secs(config.timeout_secs))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl OcrClient for TesseractOcr {
    async fn extract_text(&self, image_path: &Path) -> Result<Option<String>> {
        let mut command = Command::new(&self.binary);
        command
            .arg(image_path)
            .arg("stdout")
            .args(["-l", self.language.as_str(), "--psm", "6"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| format!("ocr timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("failed to run `{}`", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` exited with {}: {}", self.binary.display(), output.status, stderr.trim());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(
            event_name = "agent.ocr.extracted",
            image = %image_path.display(),
            chars = text.chars().count(),
            "ocr finished"
        );
        Ok(Some(text).filter(|text| !text.is_empty()))
    }
}

/// Stand-in when OCR is switched off; every image yields no text.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledOcr;

#[async_trait]
impl OcrClient for DisabledOcr {
    async fn extract_text(&self, _image_path: &Path) -> Result<Option<String>> {
        Ok(None)
    }
}
