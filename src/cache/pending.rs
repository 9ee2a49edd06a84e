/// In-flight task table: at most one running decode per cache key.
///
/// The first caller for a key runs the work; callers arriving while it is in
/// flight await the same cell and receive a clone of its outcome. The entry is
/// removed once the work settles, whether it succeeded or failed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub struct PendingTasks<T> {
    tasks: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for PendingTasks<T> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> PendingTasks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless an identical task is already in flight
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut tasks = self.lock();
            tasks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell.get_or_init(work).await.clone();

        let mut tasks = self.lock();
        if tasks.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            tasks.remove(key);
        }
        outcome
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<T>>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> std::fmt::Debug for PendingTasks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self.tasks.lock().map(|t| t.len()).unwrap_or(0);
        f.debug_struct("PendingTasks")
            .field("in_flight", &in_flight)
            .finish()
    }
}
