//! Write-back JSON stores.
//!
//! A [`WritebackStore`] keeps its document in memory and persists it from a
//! background task: updates mutate the in-memory value and nudge the
//! persister, which debounces writes to at most one per 500ms and flushes a
//! final time on shutdown.

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};
use wallet_tokio::{notify, shutdown::ShutdownSignal, task::NamedTask};

use crate::ffs::Ffs;

/// How long the persister waits after a write before accepting more work.
const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Field-wise merge of a partial update into the current document.
///
/// The default implementation replaces the value wholesale; structs override
/// it to merge field by field, and `Option` fields treat `None` as "leave
/// unchanged".
pub trait Merge: Sized {
    fn merge(&mut self, update: Self) -> anyhow::Result<()> {
        *self = update;
        Ok(())
    }
}

impl Merge for String {}
impl Merge for bool {}
impl Merge for u16 {}
impl Merge for u32 {}

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, update: Self) -> anyhow::Result<()> {
        match update {
            None => {}
            Some(value) => match self {
                None => *self = Some(value),
                Some(current) => current.merge(value)?,
            },
        }
        Ok(())
    }
}

/// Document schema version, for gating merges and future migrations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    pub fn ensure_matches(self, other: Self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self == other,
            "schema version mismatch: have {}, got {}",
            self.0,
            other.0,
        );
        Ok(())
    }
}

/// In-memory document with asynchronous JSON persistence.
pub struct WritebackStore<D> {
    data: Arc<Mutex<D>>,
    persist_tx: notify::Sender,
    persist_task: Option<NamedTask<()>>,
    shutdown: ShutdownSignal,
}

impl<D> WritebackStore<D>
where
    D: Serialize + DeserializeOwned + Default + Clone + Merge + Send + 'static,
{
    /// Load the document from `filename` (or start from default) and spawn
    /// the persister task.
    pub fn load<F: Ffs + Send + 'static>(ffs: F, filename: &str, task_name: &str) -> Self {
        let data = Arc::new(Mutex::new(load_or_default(&ffs, filename)));
        let (persist_tx, persist_rx) = notify::channel();
        let shutdown = ShutdownSignal::new();

        let persister = Persister {
            ffs,
            filename: filename.to_owned(),
            data: data.clone(),
            persist_rx,
            shutdown: shutdown.clone(),
        };
        let persist_task = Some(NamedTask::spawn(task_name.to_owned(), persister.run()));

        Self {
            data,
            persist_tx,
            persist_task,
            shutdown,
        }
    }

    /// Snapshot of the current document.
    pub fn read(&self) -> D {
        self.data.lock().unwrap().clone()
    }

    /// Merge `update` into the document and schedule a persist.
    pub fn update(&self, update: D) -> anyhow::Result<()> {
        self.data.lock().unwrap().merge(update)?;
        self.persist_tx.send();
        Ok(())
    }

    /// Reset to the default document and schedule a persist.
    pub fn reset(&self) {
        *self.data.lock().unwrap() = D::default();
        self.persist_tx.send();
    }

    /// Stop the persister, flushing any pending write.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.shutdown.send();
        let task = self
            .persist_task
            .take()
            .context("store already shut down")?;
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .context("persister failed to stop in time")?
            .context("persister panicked")
    }
}

struct Persister<F, D> {
    ffs: F,
    filename: String,
    data: Arc<Mutex<D>>,
    persist_rx: notify::Receiver,
    shutdown: ShutdownSignal,
}

impl<F: Ffs, D: Serialize> Persister<F, D> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.persist_rx.recv() => (),
                () = self.shutdown.recv() => break,
            }

            self.persist();

            // Debounce: at most one write per window, unless shutting down.
            if tokio::time::timeout(PERSIST_DEBOUNCE, self.shutdown.recv())
                .await
                .is_ok()
            {
                break;
            }
        }

        // Final flush for anything that arrived since the last write.
        if self.persist_rx.try_recv() {
            self.persist();
        }
        info!("persister {}: stopped", self.filename);
    }

    fn persist(&self) {
        let bytes = {
            let data = self.data.lock().unwrap();
            match serde_json::to_vec_pretty(&*data) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("failed to serialize {}: {err}", self.filename);
                    return;
                }
            }
        };
        if let Err(err) = self.ffs.write(&self.filename, &bytes) {
            warn!("failed to persist {}: {err}", self.filename);
        }
    }
}

fn load_or_default<F: Ffs, D: DeserializeOwned + Default>(ffs: &F, filename: &str) -> D {
    let buf = match ffs.read(filename) {
        Ok(buf) => buf,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return D::default(),
        Err(err) => {
            warn!("failed to read {filename}: {err}; starting from defaults");
            return D::default();
        }
    };
    match serde_json::from_slice(&buf) {
        Ok(data) => data,
        Err(err) => {
            warn!("failed to parse {filename}: {err}; starting from defaults");
            D::default()
        }
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;
    use crate::ffs::FlatFileFs;

    #[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: Option<String>,
        count: Option<u32>,
    }

    impl Merge for Doc {
        fn merge(&mut self, update: Self) -> anyhow::Result<()> {
            self.name.merge(update.name)?;
            self.count.merge(update.count)?;
            Ok(())
        }
    }

    #[test]
    fn option_merge_keeps_current_on_none() {
        let mut doc = Doc {
            name: Some("alpha".to_owned()),
            count: None,
        };
        doc.merge(Doc {
            name: None,
            count: Some(2),
        })
        .unwrap();
        assert_eq!(
            doc,
            Doc {
                name: Some("alpha".to_owned()),
                count: Some(2),
            },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn update_persist_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();

        let mut store = WritebackStore::<Doc>::load(ffs.clone(), "doc.json", "doc");
        assert_eq!(store.read(), Doc::default());

        store
            .update(Doc {
                name: Some("alpha".to_owned()),
                count: None,
            })
            .unwrap();
        store.update(Doc {
            name: None,
            count: Some(7),
        })
        .unwrap();

        // Shutdown flushes even if the debounce window hasn't elapsed.
        store.shutdown().await.unwrap();

        let mut store2 = WritebackStore::<Doc>::load(ffs, "doc.json", "doc");
        assert_eq!(
            store2.read(),
            Doc {
                name: Some("alpha".to_owned()),
                count: Some(7),
            },
        );
        store2.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_files_fall_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();
        ffs.write("doc.json", b"definitely not json").unwrap();

        let mut store = WritebackStore::<Doc>::load(ffs, "doc.json", "doc");
        assert_eq!(store.read(), Doc::default());
        store.shutdown().await.unwrap();
    }
}
