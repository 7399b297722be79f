//! Process lifecycle: the data-directory advisory lock, the transport
//! collaborator seam, and idempotent shutdown (`spec.md` §4.7).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::StorageError;
use platform::{LockHandle, Platform};

use crate::engine::BlobEngine;

/// The HTTP transport is out of scope (`spec.md` §1); this trait is the
/// seam the lifecycle drives it through. `tinynfsd` supplies the real
/// implementation (or, absent one, [`NoopTransport`]).
pub trait Transport: Send + Sync {
    fn start(&self) -> Result<(), StorageError>;
    fn shutdown(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn start(&self) -> Result<(), StorageError> {
        tracing::info!("transport: start (noop)");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        tracing::info!("transport: shutdown (noop)");
        Ok(())
    }
}

/// Owns the data-directory lock, the engine, and the transport
/// collaborator for the process's lifetime. `shutdown` is safe to call
/// more than once (signal handlers and normal exit paths may both call it).
pub struct Lifecycle {
    lock: Mutex<Option<LockHandle>>,
    engine: Arc<BlobEngine>,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
}

impl Lifecycle {
    /// Acquires `<data_dir>/tinynfsd.lock` and starts the transport
    /// collaborator. Fails fatally (per §6/§7: fatal at startup) if the
    /// lock is already held.
    pub fn start(
        data_dir: &Path,
        engine: Arc<BlobEngine>,
        transport: Arc<dyn Transport>,
        platform: &dyn Platform,
    ) -> Result<Self, StorageError> {
        let lock = platform.try_lock_exclusive(&data_dir.join("tinynfsd.lock"))?;
        transport.start()?;
        tracing::info!(data_dir = %data_dir.display(), "lifecycle: started");
        Ok(Lifecycle {
            lock: Mutex::new(Some(lock)),
            engine,
            transport,
            closed: AtomicBool::new(false),
        })
    }

    pub fn engine(&self) -> &BlobEngine {
        &self.engine
    }

    /// Stops the transport, closes the engine (index store + every volume
    /// group), and releases the data-directory lock. A no-op on any call
    /// after the first.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("lifecycle: shutting down");
        if let Err(err) = self.transport.shutdown() {
            tracing::warn!(error = %err, "lifecycle: transport shutdown failed");
        }
        self.engine.close();
        if let Some(handle) = self.lock.lock().expect("lifecycle lock mutex poisoned").take() {
            let _ = handle.unlock();
        }
    }
}
