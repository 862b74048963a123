use crate::CoreError;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive advisory lock guarding one build output path.
///
/// Held for the duration of a builder invocation so two builds targeting
/// the same output, in this process or another, never write it at once.
/// The lock lives in a `<output>.lock` file next to the output.
pub struct OutputLock {
    lock_file: File,
    path: PathBuf,
}

impl OutputLock {
    pub fn lock_path_for(output: &Path) -> PathBuf {
        let mut name = output
            .file_name()
            .map_or_else(|| OsString::from("output"), ToOwned::to_owned);
        name.push(".lock");
        output.with_file_name(name)
    }

    fn open(output: &Path) -> Result<(File, PathBuf), CoreError> {
        let lock_path = Self::lock_path_for(output);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        Ok((file, lock_path))
    }

    /// Block until the lock is available.
    pub fn acquire(output: &Path) -> Result<Self, CoreError> {
        let (file, path) = Self::open(output)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Ok(Self {
            lock_file: file,
            path,
        })
    }

    pub fn try_acquire(output: &Path) -> Result<Option<Self>, CoreError> {
        let (file, path) = Self::open(output)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(_) => Ok(None),
        }
    }

    /// Acquire without blocking the async runtime.
    pub async fn acquire_async(output: &Path) -> Result<Self, CoreError> {
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire(&output))
            .await
            .map_err(|e| CoreError::Io(std::io::Error::other(format!("lock task failed: {e}"))))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C asks running operations to wind down; a second kills any
/// running scripts or builder and exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            let killed = dockyard_runtime::kill_active_process_groups();
            if killed > 0 {
                eprintln!("killed {killed} running process group(s)");
            }
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current operation...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
