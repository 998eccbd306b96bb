use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

/// Ceiling on how long a request waits for a load started by another
/// request before giving up.
const DEFAULT_WAIT_CEILING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("Model loading timeout")]
    Timeout,
    #[error("Failed to load model: {0}")]
    Failed(String),
}

type Settled<T> = Option<Result<Arc<T>, LoadError>>;

enum CellState<T> {
    Empty,
    Loading(watch::Receiver<Settled<T>>),
    Ready(Arc<T>),
}

/// Lazy single-flight holder for a loaded model.
///
/// The first caller becomes the leader: the load closure runs once on the
/// blocking pool and its outcome is published to every caller through a
/// watch channel. Concurrent callers await that same outcome instead of
/// re-running the load; waiters are bounded by a wait ceiling while the
/// leader waits for as long as the load takes. A failed load returns the
/// cell to empty so a later request retries.
pub struct ModelCell<T> {
    state: Mutex<CellState<T>>,
    wait_ceiling: Duration,
}

impl<T: Send + Sync + 'static> ModelCell<T> {
    pub fn new() -> Self {
        Self::with_wait_ceiling(DEFAULT_WAIT_CEILING)
    }

    pub fn with_wait_ceiling(wait_ceiling: Duration) -> Self {
        Self {
            state: Mutex::new(CellState::Empty),
            wait_ceiling,
        }
    }

    /// Whether a load is currently in flight.
    pub fn is_loading(&self) -> bool {
        matches!(*self.state.lock().unwrap(), CellState::Loading(_))
    }

    /// The cached handle, if a load has completed.
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.state.lock().unwrap() {
            CellState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    /// Returns the cached handle, loading it first if necessary.
    ///
    /// `load` runs at most once per settling cycle, detached from the
    /// calling task: a request aborted mid-load does not wedge the cell.
    pub async fn get_or_load<F>(self: &Arc<Self>, load: F) -> Result<Arc<T>, LoadError>
    where
        F: FnOnce() -> Result<T, LoadError> + Send + 'static,
    {
        let (rx, leader) = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                CellState::Ready(model) => return Ok(model.clone()),
                CellState::Loading(rx) => (rx.clone(), false),
                CellState::Empty => {
                    let (tx, rx) = watch::channel(None);
                    *state = CellState::Loading(rx.clone());
                    let cell = self.clone();
                    tokio::spawn(async move {
                        let outcome = match tokio::task::spawn_blocking(load).await {
                            Ok(Ok(model)) => Ok(Arc::new(model)),
                            Ok(Err(e)) => Err(e),
                            Err(e) => {
                                Err(LoadError::Failed(format!("load task panicked: {}", e)))
                            }
                        };
                        let mut state = cell.state.lock().unwrap();
                        *state = match &outcome {
                            Ok(model) => CellState::Ready(model.clone()),
                            Err(_) => CellState::Empty,
                        };
                        drop(state);
                        let _ = tx.send(Some(outcome));
                    });
                    (rx, true)
                }
            }
        };

        self.await_settled(rx, leader).await
    }

    async fn await_settled(
        &self,
        mut rx: watch::Receiver<Settled<T>>,
        leader: bool,
    ) -> Result<Arc<T>, LoadError> {
        let changed = rx.changed();
        if leader {
            changed
                .await
                .map_err(|_| LoadError::Failed("model loading task was dropped".into()))?;
        } else {
            match tokio::time::timeout(self.wait_ceiling, changed).await {
                Err(_) => return Err(LoadError::Timeout),
                Ok(changed) => changed
                    .map_err(|_| LoadError::Failed("model loading task was dropped".into()))?,
            }
        }

        let settled = rx.borrow();
        match settled.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(LoadError::Failed("model load did not settle".into())),
        }
    }
}

impl<T: Send + Sync + 'static> Default for ModelCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_callers_share_one_load() {
        let cell = Arc::new(ModelCell::<u64>::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cell.get_or_load(move || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(7)
                })
                .await
            }));
        }

        let mut models = Vec::new();
        for handle in handles {
            models.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for model in &models {
            assert!(Arc::ptr_eq(model, &models[0]));
        }
        assert!(!cell.is_loading());
        assert_eq!(cell.get().as_deref(), Some(&7));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiter_times_out_on_stuck_load() {
        let cell = Arc::new(ModelCell::<u64>::with_wait_ceiling(Duration::from_millis(
            50,
        )));

        let leader = {
            let cell = cell.clone();
            tokio::spawn(async move {
                cell.get_or_load(|| {
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(1)
                })
                .await
            })
        };

        // Let the leader claim the cell first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cell.is_loading());

        let waited = cell.get_or_load(|| Ok(2)).await;
        assert!(matches!(waited, Err(LoadError::Timeout)));

        // The leader itself is not subject to the ceiling.
        assert_eq!(*leader.await.unwrap().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_load_resets_for_retry() {
        let cell = Arc::new(ModelCell::<u64>::new());

        let first = cell
            .get_or_load(|| Err(LoadError::Failed("boom".into())))
            .await;
        assert!(matches!(first, Err(LoadError::Failed(_))));
        assert!(!cell.is_loading());
        assert!(cell.get().is_none());

        let second = cell.get_or_load(|| Ok(3)).await.unwrap();
        assert_eq!(*second, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiter_observes_leader_failure() {
        let cell = Arc::new(ModelCell::<u64>::new());

        let leader = {
            let cell = cell.clone();
            tokio::spawn(async move {
                cell.get_or_load(|| {
                    std::thread::sleep(Duration::from_millis(100));
                    Err(LoadError::Failed("download failed".into()))
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let waited = cell.get_or_load(|| Ok(9)).await;
        assert!(matches!(waited, Err(LoadError::Failed(_))));
        assert!(leader.await.unwrap().is_err());
    }
}
