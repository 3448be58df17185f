//! Bounded worker pool for the built-in engine's per-block passes.
//!
//! A `rayon::ThreadPool` does the running; a bounded `crossbeam_channel`
//! plays semaphore so submitters block instead of queueing unbounded work.
//! The pool survives across chunks: create once per engine with the thread
//! count the tuner is currently asking for, drain between chunks.

use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::ThreadPool;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    count: usize,
}

/// Fixed-size pool with a bounded submission queue.
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    pending: Arc<(Mutex<Pending>, Condvar)>,
    nthreads: usize,
}

impl WorkerPool {
    /// Build a pool of `nthreads` workers with `2 * nthreads` queue slots.
    /// Returns `None` when the pool cannot be spawned.
    pub fn new(nthreads: usize) -> Option<Self> {
        let nthreads = nthreads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()
            .ok()?;

        let capacity = nthreads * 3;
        let (slot_tx, slot_rx) = bounded(capacity);
        for _ in 0..capacity {
            slot_tx.send(()).ok()?;
        }

        Some(WorkerPool {
            pool: Arc::new(pool),
            slot_tx,
            slot_rx,
            pending: Arc::new((Mutex::new(Pending { count: 0 }), Condvar::new())),
            nthreads,
        })
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Submit one job; blocks while the queue is full.
    pub fn submit(&self, job: Job) {
        self.slot_rx.recv().expect("worker pool slot channel closed");

        {
            let (lock, _) = &*self.pending;
            lock.lock().unwrap().count += 1;
        }

        let pending = Arc::clone(&self.pending);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();
            let (lock, cvar) = &*pending;
            let mut p = lock.lock().unwrap();
            p.count -= 1;
            if p.count == 0 {
                cvar.notify_all();
            }
            let _ = slot_tx.send(());
        });
    }

    /// Block until every submitted job has finished.  The pool stays usable.
    pub fn drain(&self) {
        let (lock, cvar) = &*self.pending;
        let mut p = lock.lock().unwrap();
        while p.count > 0 {
            p = cvar.wait(p).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.drain();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_jobs() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn drain_is_reentrant() {
        let pool = WorkerPool::new(2).unwrap();
        pool.drain();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_threads_rounds_up_to_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.nthreads(), 1);
    }
}
