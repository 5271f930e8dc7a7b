//! Bulk copy of resolved granule directories through an external tool.
use crate::error::TransferError;
use crate::pipeline::ResolutionReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

pub trait Transfer {
    /// Copies every remote `sources` directory below `destination`, running at most `concurrency`
    /// file transfers at once.
    async fn transfer(
        &self,
        sources: &[String],
        destination: &Path,
        concurrency: usize,
    ) -> Result<(), TransferError>;
}

/// Drives `rclone copy` with an include list holding one pattern per source directory.
#[derive(Debug, Clone)]
pub struct RcloneTransfer {
    binary: String,
    remote: String,
    /// Where the include list is created; the system temp directory when unset.
    list_dir: Option<PathBuf>,
}

impl RcloneTransfer {
    pub fn new(binary: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            remote: remote.into(),
            list_dir: None,
        }
    }

    pub fn with_list_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.list_dir = Some(dir.into());
        self
    }

    fn include_list(&self, sources: &[String]) -> Result<NamedTempFile, TransferError> {
        let mut file = match &self.list_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        for source in sources {
            writeln!(file, "{}", include_pattern(source))?;
        }
        file.flush()?;
        Ok(file)
    }
}

/// `eodata/Sentinel-2/.../GRANULE/L2A_...` -> `/eodata/Sentinel-2/.../GRANULE/L2A_.../**`
fn include_pattern(source: &str) -> String {
    format!("/{}/**", source.trim_matches('/'))
}

impl Transfer for RcloneTransfer {
    async fn transfer(
        &self,
        sources: &[String],
        destination: &Path,
        concurrency: usize,
    ) -> Result<(), TransferError> {
        if sources.is_empty() {
            return Err(TransferError::Empty);
        }
        fs::create_dir_all(destination)?;
        // Removed from disk when dropped at the end of this call.
        let list = self.include_list(sources)?;

        info!(
            sources = sources.len(),
            destination = %destination.display(),
            "Starting {} copy",
            self.binary
        );
        let output = Command::new(&self.binary)
            .arg("copy")
            .arg("--include-from")
            .arg(list.path())
            .arg(&self.remote)
            .arg(destination)
            .arg("--transfers")
            .arg(concurrency.max(1).to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransferError::Spawn {
                binary: self.binary.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TransferError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!("{}", String::from_utf8_lossy(&output.stdout));
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub destination: PathBuf,
    pub concurrency: usize,
    pub sources: Vec<String>,
}

impl TransferPlan {
    pub fn new(destination: impl Into<PathBuf>, concurrency: usize, sources: Vec<String>) -> Self {
        Self {
            destination: destination.into(),
            concurrency,
            sources,
        }
    }

    pub fn from_report(
        report: &ResolutionReport,
        destination: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self::new(destination, concurrency, report.source_paths())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, TransferError> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TransferError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub async fn execute(&self, transfer: &impl Transfer) -> Result<(), TransferError> {
        transfer
            .transfer(&self.sources, &self.destination, self.concurrency)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TEST_OUTPUT_PATH: &str = "/tmp/transfer_plan.json";

    fn mock_transfer_plan() -> TransferPlan {
        TransferPlan::new(
            "/tmp/granules",
            4,
            vec![
                "eodata/Sentinel-2/MSI/L2A/2024/05/04/S2A_MSIL2A_20240504T195901_N0510_R128_T08VPH_20240505T015750.SAFE/GRANULE/L2A_T08VPH_A046314_20240504T195929".to_string(),
                "eodata/Sentinel-2/MSI/L2A/2023/01/01/S2B_MSIL2A_20230101T101010_N0509_R022_T32TQM_20230101T120000.SAFE/GRANULE/L2A_T32TQM_A030611_20230101T101010".to_string(),
            ],
        )
    }

    #[derive(Default)]
    struct RecordingTransfer {
        calls: Mutex<Vec<(Vec<String>, PathBuf, usize)>>,
    }

    impl Transfer for RecordingTransfer {
        async fn transfer(
            &self,
            sources: &[String],
            destination: &Path,
            concurrency: usize,
        ) -> Result<(), TransferError> {
            self.calls
                .lock()
                .unwrap()
                .push((sources.to_vec(), destination.to_path_buf(), concurrency));
            Ok(())
        }
    }

    #[test]
    fn test_write_json() {
        let path = Path::new(TEST_OUTPUT_PATH);
        let plan = mock_transfer_plan();
        plan.write(path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let plan = mock_transfer_plan();
        plan.write(&path).unwrap();

        let read = TransferPlan::read(&path).unwrap();
        assert_eq!(read, plan);
        assert_eq!(read.sources.len(), 2);
    }

    #[test]
    fn test_include_pattern() {
        assert_eq!(
            include_pattern("eodata/Sentinel-2/X.SAFE/GRANULE/L2A_T08VPH_A046314_20240504T195929"),
            "/eodata/Sentinel-2/X.SAFE/GRANULE/L2A_T08VPH_A046314_20240504T195929/**"
        );
        assert_eq!(include_pattern("/a/b/"), "/a/b/**");
    }

    #[test]
    fn test_include_list_contents() {
        let plan = mock_transfer_plan();
        let list = RcloneTransfer::new("rclone", "eodata:")
            .include_list(&plan.sources)
            .unwrap();
        let content = fs::read_to_string(list.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("/eodata/") && l.ends_with("/**")));
    }

    #[tokio::test]
    async fn test_execute_hands_plan_to_transfer() {
        let plan = mock_transfer_plan();
        let transfer = RecordingTransfer::default();
        plan.execute(&transfer).await.unwrap();

        let calls = transfer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, plan.sources);
        assert_eq!(calls[0].1, PathBuf::from("/tmp/granules"));
        assert_eq!(calls[0].2, 4);
    }

    #[tokio::test]
    async fn test_empty_sources() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = RcloneTransfer::new("rclone", "eodata:");
        assert!(matches!(
            transfer.transfer(&[], dir.path(), 4).await,
            Err(TransferError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = RcloneTransfer::new("definitely-not-an-installed-binary", "eodata:");
        let err = transfer
            .transfer(&mock_transfer_plan().sources, dir.path(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = RcloneTransfer::new("false", "eodata:");
        let err = transfer
            .transfer(&mock_transfer_plan().sources, dir.path(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Failed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_successful_exit_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/out");
        let transfer = RcloneTransfer::new("true", "eodata:");
        transfer
            .transfer(&mock_transfer_plan().sources, &destination, 4)
            .await
            .unwrap();
        assert!(destination.is_dir());
    }

    #[tokio::test]
    async fn test_include_list_is_removed_after_use() {
        for binary in ["true", "false"] {
            let lists = tempfile::tempdir().unwrap();
            let destination = tempfile::tempdir().unwrap();
            let transfer = RcloneTransfer::new(binary, "eodata:").with_list_dir(lists.path());

            let result = transfer
                .transfer(&mock_transfer_plan().sources, destination.path(), 4)
                .await;

            assert_eq!(result.is_ok(), binary == "true");
            assert_eq!(fs::read_dir(lists.path()).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_include_list_lands_in_list_dir() {
        let lists = tempfile::tempdir().unwrap();
        let transfer = RcloneTransfer::new("rclone", "eodata:").with_list_dir(lists.path());
        let list = transfer.include_list(&mock_transfer_plan().sources).unwrap();
        assert_eq!(list.path().parent(), Some(lists.path()));
        assert_eq!(fs::read_dir(lists.path()).unwrap().count(), 1);
        drop(list);
        assert_eq!(fs::read_dir(lists.path()).unwrap().count(), 0);
    }
}
