//! Local or mounted directory sink

use crate::adapters::sink::{DeliverySink, SinkWrite};
use crate::config::DeliveryConfig;
use crate::domain::DeliverySinkError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Watch directory on a filesystem path
///
/// The staging directory must be on the same volume as the watch directory
/// so the final link is atomic.
///
/// Filesystem jobs run one at a time. A job that outlives its timeout keeps
/// the sink busy until it returns, so a retry never races the attempt it
/// replaces.
#[derive(Debug, Clone)]
pub struct FsSink {
    watch_dir: PathBuf,
    staging_dir: PathBuf,
    io_timeout: Duration,
    busy: Arc<tokio::sync::Mutex<()>>,
    landed: Arc<Mutex<HashSet<String>>>,
}

impl FsSink {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            watch_dir: config.watch_dir.clone(),
            staging_dir: config.staging_path(),
            io_timeout: Duration::from_secs(config.io_timeout_seconds),
            busy: Arc::new(tokio::sync::Mutex::new(())),
            landed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Runs a blocking filesystem job under the I/O timeout
    async fn blocking<T, F>(&self, job: F) -> Result<T, DeliverySinkError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DeliverySinkError> + Send + 'static,
    {
        let busy = Arc::clone(&self.busy);
        let run = async move {
            let guard = busy.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                job()
            })
            .await
        };
        match tokio::time::timeout(self.io_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DeliverySinkError::WriteFailed(format!(
                "sink task aborted: {join}"
            ))),
            Err(_) => Err(DeliverySinkError::Timeout(self.io_timeout.as_secs())),
        }
    }
}

fn ensure_reachable(dir: &Path) -> Result<(), DeliverySinkError> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DeliverySinkError::Unreachable(format!(
            "{} is not a directory",
            dir.display()
        ))),
        Err(e) => Err(DeliverySinkError::Unreachable(format!(
            "{}: {e}",
            dir.display()
        ))),
    }
}

/// Temporary name; the leading dot keeps watchers from picking it up
fn temp_name(file_name: &str) -> String {
    format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple())
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

/// Moves a finished temp file to its final name without replacing anything
///
/// Returns false when the target already exists. The temp file is gone
/// either way on success.
fn place(tmp: &Path, target: &Path) -> Result<bool, DeliverySinkError> {
    let rename_failed = |e: std::io::Error| {
        DeliverySinkError::RenameFailed(format!(
            "{} -> {}: {e}",
            tmp.display(),
            target.display()
        ))
    };

    match fs::hard_link(tmp, target) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(tmp) {
                tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove staged file");
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(tmp);
            Ok(false)
        }
        // Volumes without hard links fall back to check-then-rename
        Err(e) if matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied) => {
            if target.exists() {
                let _ = fs::remove_file(tmp);
                return Ok(false);
            }
            fs::rename(tmp, target).map_err(|e| {
                let _ = fs::remove_file(tmp);
                rename_failed(e)
            })?;
            Ok(true)
        }
        Err(e) => {
            let _ = fs::remove_file(tmp);
            Err(rename_failed(e))
        }
    }
}

fn deliver_blocking(
    watch_dir: &Path,
    staging_dir: &Path,
    landed: &Mutex<HashSet<String>>,
    file_name: &str,
    bytes: &[u8],
) -> Result<SinkWrite, DeliverySinkError> {
    let target = watch_dir.join(file_name);

    // Once placed, a name is never written again even if the print tool
    // has already consumed the file
    let already_landed = landed
        .lock()
        .map_err(|_| DeliverySinkError::WriteFailed("sink state poisoned".to_string()))?
        .contains(file_name);
    if already_landed {
        return Ok(SinkWrite::AlreadyPresent { path: target });
    }

    ensure_reachable(watch_dir)?;

    if target.exists() {
        return Ok(SinkWrite::AlreadyPresent { path: target });
    }

    fs::create_dir_all(staging_dir).map_err(|e| {
        DeliverySinkError::WriteFailed(format!("{}: {e}", staging_dir.display()))
    })?;

    let tmp = staging_dir.join(temp_name(file_name));
    if let Err(e) = write_temp(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(DeliverySinkError::WriteFailed(format!(
            "{}: {e}",
            tmp.display()
        )));
    }

    if !place(&tmp, &target)? {
        return Ok(SinkWrite::AlreadyPresent { path: target });
    }

    landed
        .lock()
        .map_err(|_| DeliverySinkError::WriteFailed("sink state poisoned".to_string()))?
        .insert(file_name.to_string());

    sync_dir(watch_dir)
        .map_err(|e| DeliverySinkError::WriteFailed(format!("{}: {e}", watch_dir.display())))?;

    Ok(SinkWrite::Written { path: target })
}

fn probe_dir(dir: &Path) -> Result<(), DeliverySinkError> {
    let probe = dir.join(format!(".labelbridge-probe-{}", uuid::Uuid::new_v4().simple()));
    write_temp(&probe, b"probe")
        .map_err(|e| DeliverySinkError::NotWritable(format!("{}: {e}", dir.display())))?;
    fs::remove_file(&probe)
        .map_err(|e| DeliverySinkError::NotWritable(format!("{}: {e}", probe.display())))
}

#[async_trait]
impl DeliverySink for FsSink {
    fn describe(&self) -> String {
        self.watch_dir.display().to_string()
    }

    fn target_path(&self, file_name: &str) -> PathBuf {
        self.watch_dir.join(file_name)
    }

    async fn probe(&self) -> Result<(), DeliverySinkError> {
        let watch_dir = self.watch_dir.clone();
        let staging_dir = self.staging_dir.clone();
        self.blocking(move || {
            ensure_reachable(&watch_dir)?;
            probe_dir(&watch_dir)?;
            fs::create_dir_all(&staging_dir).map_err(|e| {
                DeliverySinkError::NotWritable(format!("{}: {e}", staging_dir.display()))
            })?;
            probe_dir(&staging_dir)
        })
        .await
    }

    async fn exists(&self, file_name: &str) -> Result<bool, DeliverySinkError> {
        let watch_dir = self.watch_dir.clone();
        let target = self.target_path(file_name);
        self.blocking(move || {
            ensure_reachable(&watch_dir)?;
            Ok(target.exists())
        })
        .await
    }

    async fn deliver(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<SinkWrite, DeliverySinkError> {
        let watch_dir = self.watch_dir.clone();
        let staging_dir = self.staging_dir.clone();
        let landed = Arc::clone(&self.landed);
        let file_name = file_name.to_string();
        let bytes = bytes.to_vec();
        self.blocking(move || {
            deliver_blocking(&watch_dir, &staging_dir, &landed, &file_name, &bytes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink(dir: &TempDir) -> FsSink {
        let watch = dir.path().join("watch");
        fs::create_dir_all(&watch).unwrap();
        FsSink::new(&DeliveryConfig::new(watch))
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_deliver_writes_final_file_only() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);

        let written = sink.deliver("1-batch.csv", b"a,b\n1,2\n").await.unwrap();

        assert!(matches!(written, SinkWrite::Written { .. }));
        assert_eq!(fs::read(written.path()).unwrap(), b"a,b\n1,2\n");
        assert_eq!(visible_files(sink.watch_dir()), vec!["1-batch.csv"]);
        assert!(visible_files(sink.staging_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_deliver_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.deliver("x.csv", b"first\n").await.unwrap();

        let second = sink.deliver("x.csv", b"second\n").await.unwrap();

        assert!(matches!(second, SinkWrite::AlreadyPresent { .. }));
        assert_eq!(fs::read(sink.target_path("x.csv")).unwrap(), b"first\n");
        assert!(sink.exists("x.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_watch_dir_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let sink = FsSink::new(&DeliveryConfig::new(dir.path().join("gone")));

        let err = sink.deliver("x.csv", b"x").await.unwrap_err();
        assert!(matches!(err, DeliverySinkError::Unreachable(_)));
        assert!(matches!(
            sink.probe().await,
            Err(DeliverySinkError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);

        sink.probe().await.unwrap();

        assert!(visible_files(sink.watch_dir()).is_empty());
        assert!(visible_files(sink.staging_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_consumed_file_is_not_written_again() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.deliver("x.csv", b"first\n").await.unwrap();

        // Print tool picks the file up between attempts
        fs::remove_file(sink.target_path("x.csv")).unwrap();

        let again = sink.deliver("x.csv", b"first\n").await.unwrap();
        assert!(matches!(again, SinkWrite::AlreadyPresent { .. }));
        assert!(visible_files(sink.watch_dir()).is_empty());
    }

    #[test]
    fn test_place_never_replaces_target() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".x.csv.tmp");
        let target = dir.path().join("x.csv");
        fs::write(&target, b"first\n").unwrap();
        fs::write(&tmp, b"second\n").unwrap();

        assert!(!place(&tmp, &target).unwrap());
        assert_eq!(fs::read(&target).unwrap(), b"first\n");
        assert!(!tmp.exists());

        fs::write(&tmp, b"third\n").unwrap();
        let fresh = dir.path().join("y.csv");
        assert!(place(&tmp, &fresh).unwrap());
        assert_eq!(fs::read(&fresh).unwrap(), b"third\n");
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_timed_out_job_finishes_before_next_starts() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = TempDir::new().unwrap();
        let mut config = DeliveryConfig::new(dir.path());
        config.io_timeout_seconds = 1;
        let sink = FsSink::new(&config);
        let finished = Arc::new(AtomicBool::new(false));

        let slow = Arc::clone(&finished);
        let first = sink
            .blocking(move || {
                std::thread::sleep(Duration::from_millis(1500));
                slow.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(first, Err(DeliverySinkError::Timeout(1))));

        let seen = Arc::clone(&finished);
        let second = sink.blocking(move || Ok(seen.load(Ordering::SeqCst))).await;
        assert!(second.unwrap());
    }

    #[test]
    fn test_temp_name_is_hidden() {
        let name = temp_name("a.csv");
        assert!(name.starts_with(".a.csv."));
        assert!(name.ends_with(".tmp"));
    }
}
