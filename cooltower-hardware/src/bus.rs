//! Bus arbitration
//!
//! All traffic on the shared RS-485 line goes through one [`BusArbiter`].
//! Acquisition is bounded: a caller that cannot get the bus within the
//! configured timeout gets `BusBusy` instead of waiting forever. When other
//! processes share the same adapter, an advisory `flock` on a well-known file
//! extends the exclusion across process boundaries.

use cooltower_core::{CoolTowerError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::serial_driver::RtuTransport;

/// Poll interval while waiting for the cross-process lock
const PROCESS_LOCK_POLL: Duration = Duration::from_millis(10);

/// Cross-process exclusive lock on a lock file
///
/// The file is opened once; each acquisition only takes and releases the
/// `flock` on that handle.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    wait: Duration,
    file: Arc<File>,
}

impl ProcessLock {
    /// Open (creating if needed) the lock file at `path`.
    pub fn new(path: impl Into<PathBuf>, wait: Duration) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                CoolTowerError::Transport(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            path,
            wait,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, polling until it is free or the wait expires.
    pub async fn acquire(&self) -> Result<ProcessLockGuard> {
        let started = Instant::now();
        loop {
            match self.file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(ProcessLockGuard {
                        file: self.file.clone(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || is_contended(&e) => {
                    if started.elapsed() >= self.wait {
                        warn!(
                            "Lock file {} still held after {:?}",
                            self.path.display(),
                            self.wait
                        );
                        return Err(CoolTowerError::BusBusy {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(PROCESS_LOCK_POLL).await;
                }
                Err(e) => {
                    return Err(CoolTowerError::Transport(format!(
                        "Failed to lock {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Held cross-process lock; released on drop
#[derive(Debug)]
pub struct ProcessLockGuard {
    file: Arc<File>,
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file) {
            warn!("Failed to release bus lock file: {}", e);
        }
    }
}

/// Counters for bus usage
#[derive(Debug, Default)]
struct BusCounters {
    acquired: AtomicU64,
    busy: AtomicU64,
}

/// Snapshot of bus usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub acquired: u64,
    pub busy: u64,
}

/// Serializes access to the one physical bus
pub struct BusArbiter {
    transport: Mutex<Box<dyn RtuTransport>>,
    lock_timeout: Duration,
    process_lock: Option<ProcessLock>,
    counters: BusCounters,
}

impl BusArbiter {
    /// Wrap `transport`; acquisition waits at most `lock_timeout`.
    pub fn new(transport: Box<dyn RtuTransport>, lock_timeout: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            lock_timeout,
            process_lock: None,
            counters: BusCounters::default(),
        }
    }

    /// Also require the cross-process lock on every acquisition.
    pub fn with_process_lock(mut self, lock: ProcessLock) -> Self {
        self.process_lock = Some(lock);
        self
    }

    /// Acquire exclusive access to the bus.
    ///
    /// The in-process lock is taken first, then the cross-process lock if
    /// configured. Dropping the guard releases both, in reverse order.
    pub async fn acquire(&self) -> Result<BusGuard<'_>> {
        let started = Instant::now();
        let transport = match timeout(self.lock_timeout, self.transport.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.counters.busy.fetch_add(1, Ordering::Relaxed);
                warn!("Bus lock not acquired within {:?}", self.lock_timeout);
                return Err(CoolTowerError::BusBusy {
                    waited_ms: self.lock_timeout.as_millis() as u64,
                });
            }
        };

        let process = match &self.process_lock {
            Some(lock) => match lock.acquire().await {
                Ok(guard) => Some(guard),
                Err(e) => {
                    if matches!(e, CoolTowerError::BusBusy { .. }) {
                        self.counters.busy.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        debug!("Bus acquired after {:?}", started.elapsed());
        Ok(BusGuard {
            _process: process,
            transport,
        })
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            busy: self.counters.busy.load(Ordering::Relaxed),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Exclusive access to the bus transport
///
/// Field order matters: the process lock is released before the in-process one.
pub struct BusGuard<'a> {
    _process: Option<ProcessLockGuard>,
    transport: MutexGuard<'a, Box<dyn RtuTransport>>,
}

impl Deref for BusGuard<'_> {
    type Target = dyn RtuTransport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}

impl DerefMut for BusGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transport.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedBus;

    fn arbiter(lock_timeout_ms: u64) -> BusArbiter {
        BusArbiter::new(
            Box::new(SimulatedBus::new()),
            Duration::from_millis(lock_timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let bus = arbiter(100);
        {
            let guard = bus.acquire().await.unwrap();
            assert_eq!(guard.port_path(), Some("simulated"));
        }
        // Released on drop, so a second acquisition succeeds immediately
        let _guard = bus.acquire().await.unwrap();
        assert_eq!(bus.stats().acquired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_with_bus_busy() {
        let bus = arbiter(50);
        let _held = bus.acquire().await.unwrap();

        match bus.acquire().await {
            Err(CoolTowerError::BusBusy { waited_ms }) => assert_eq!(waited_ms, 50),
            Err(e) => panic!("Expected BusBusy, got {:?}", e),
            Ok(_) => panic!("Expected BusBusy, got a guard"),
        }
        assert_eq!(bus.stats().busy, 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_lock() {
        let bus = std::sync::Arc::new(arbiter(1000));
        let held = bus.acquire().await.unwrap();

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let _guard = bus.acquire().await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;
        drop(held);

        assert!(bus.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_process_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");
        let first = ProcessLock::new(&path, Duration::from_millis(50)).unwrap();
        let second = ProcessLock::new(&path, Duration::from_millis(50)).unwrap();

        let guard = first.acquire().await.unwrap();
        assert!(matches!(
            second.acquire().await,
            Err(CoolTowerError::BusBusy { .. })
        ));

        drop(guard);
        assert!(second.acquire().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lock_opens_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");
        let lock = ProcessLock::new(&path, Duration::from_millis(50)).unwrap();
        assert!(path.exists());

        // The held handle keeps working after the path is gone
        std::fs::remove_file(&path).unwrap();
        for _ in 0..3 {
            let guard = lock.acquire().await.unwrap();
            drop(guard);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_process_lock_reports_unopenable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bus.lock");
        assert!(matches!(
            ProcessLock::new(&path, Duration::from_millis(50)),
            Err(CoolTowerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_arbiter_with_process_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");
        let bus = arbiter(100)
            .with_process_lock(ProcessLock::new(&path, Duration::from_millis(50)).unwrap());

        // Another "process" holds the file lock
        let outside = ProcessLock::new(&path, Duration::from_millis(50)).unwrap();
        let held = outside.acquire().await.unwrap();
        assert!(matches!(
            bus.acquire().await,
            Err(CoolTowerError::BusBusy { .. })
        ));

        drop(held);
        let guard = bus.acquire().await.unwrap();
        drop(guard);
        assert!(outside.acquire().await.is_ok());
    }
}
