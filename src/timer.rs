use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use ulid::Ulid;

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One cancellable delayed task per id.
///
/// Arming an id aborts whatever was armed for it before. A task must
/// [`claim`](TimerSet::claim) its generation before acting, so a task that
/// lost a race with a re-arm does nothing.
pub struct TimerSet {
    armed: DashMap<Ulid, Armed>,
    next_generation: AtomicU64,
    gauge: Option<&'static str>,
}

impl TimerSet {
    pub fn new(gauge: Option<&'static str>) -> Self {
        Self {
            armed: DashMap::new(),
            next_generation: AtomicU64::new(0),
            gauge,
        }
    }

    /// Run `fire(generation)` after `delay`, replacing any timer armed for `id`.
    pub fn arm<F, Fut>(&self, id: Ulid, delay: Duration, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        // The entry stays locked until the new handle is stored, so the task
        // cannot claim before it is registered.
        match self.armed.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.get().handle.abort();
                let handle = spawn_delayed(delay, generation, fire);
                slot.insert(Armed { generation, handle });
            }
            Entry::Vacant(slot) => {
                let handle = spawn_delayed(delay, generation, fire);
                slot.insert(Armed { generation, handle });
            }
        }
        self.update_gauge();
    }

    /// Abort the timer for `id`. Returns false if none was armed.
    pub fn cancel(&self, id: Ulid) -> bool {
        let removed = self.armed.remove(&id);
        if let Some((_, armed)) = &removed {
            armed.handle.abort();
        }
        self.update_gauge();
        removed.is_some()
    }

    /// Called by a firing task. True iff `generation` is still the current
    /// timer for `id`; the timer is then unregistered.
    pub fn claim(&self, id: Ulid, generation: u64) -> bool {
        let claimed = self
            .armed
            .remove_if(&id, |_, armed| armed.generation == generation)
            .is_some();
        self.update_gauge();
        claimed
    }

    pub fn is_armed(&self, id: Ulid) -> bool {
        self.armed.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn cancel_all(&self) {
        self.armed.retain(|_, armed| {
            armed.handle.abort();
            false
        });
        self.update_gauge();
    }

    fn update_gauge(&self) {
        if let Some(name) = self.gauge {
            metrics::gauge!(name).set(self.armed.len() as f64);
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        for armed in self.armed.iter() {
            armed.handle.abort();
        }
    }
}

fn spawn_delayed<F, Fut>(delay: Duration, generation: u64, fire: F) -> JoinHandle<()>
where
    F: FnOnce(u64) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fire(generation).await;
    })
}
