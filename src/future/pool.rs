//! The Completion Pool (§4.9, §5): a fixed set of worker threads for
//! blocking work, decoupled from the single-threaded reactor by a
//! completion queue and a self-pipe the reactor polls for readiness.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use mio::unix::pipe;

use crate::error::Error;
use crate::future::Future;

type Job = Box<dyn FnOnce() + Send>;
type Completion = Box<dyn FnOnce() + Send>;

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    jobs_cv: Condvar,
    completions: Mutex<VecDeque<Completion>>,
    notify_tx: Mutex<pipe::Sender>,
    shutdown: AtomicBool,
    max_queue: usize,
}

/// A pool of blocking-work worker threads (§4.9). Submissions run on a
/// worker thread; the future they resolve only ever has its callbacks
/// invoked later, on the reactor thread, via [`Pool::process_ready`].
pub struct Pool {
    shared: Arc<Shared>,
    notify_rx: pipe::Receiver,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawns `worker_count` threads (default `num_cpus::get()`, §6) and a
    /// self-pipe the reactor registers for readiness.
    pub fn new(worker_count: usize, max_queue: usize) -> std::io::Result<Pool> {
        let (notify_tx, notify_rx) = pipe::new()?;
        let shared = Arc::new(Shared {
            jobs: Mutex::new(VecDeque::new()),
            jobs_cv: Condvar::new(),
            completions: Mutex::new(VecDeque::new()),
            notify_tx: Mutex::new(notify_tx),
            shutdown: AtomicBool::new(false),
            max_queue,
        });

        let workers = (0..worker_count.max(1))
            .map(|idx| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("hypersonic-pool-{idx}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Ok(Pool {
            shared,
            notify_rx,
            workers,
        })
    }

    /// The fd the reactor should register for read-readiness; becomes
    /// readable whenever at least one completion is waiting.
    pub fn notify_fd(&self) -> RawFd {
        self.notify_rx.as_raw_fd()
    }

    /// Submits blocking work. `work` runs on a worker thread; its result
    /// resolves `future` once [`Pool::process_ready`] drains it on the
    /// reactor thread. Errors with `PoolSubmissionFull` if the queue is at
    /// capacity (§4.9).
    pub fn submit<T, F>(&self, future: Future<T>, work: F) -> crate::error::Result<()>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    {
        {
            let jobs = self.shared.jobs.lock().unwrap();
            if jobs.len() >= self.shared.max_queue {
                return Err(Error::pool_full());
            }
        }
        let shared = self.shared.clone();
        let job: Job = Box::new(move || {
            // Thunks return a `Result`, not an exception; a panic is still
            // possible (a bug in the thunk, an indexing error, ...) and must
            // not take the whole worker thread down with it (§9: "panics
            // caught at the worker boundary and converted to a typed Future
            // failure with category `internal`").
            let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::from_worker_panic(&payload)),
            };
            let completion: Completion = Box::new(move || match outcome {
                Ok(v) => future.done(v),
                Err(e) => future.fail(e),
            });
            shared.completions.lock().unwrap().push_back(completion);
            let mut tx = shared.notify_tx.lock().unwrap();
            let _ = tx.write(&[1]);
        });
        self.shared.jobs.lock().unwrap().push_back(job);
        self.shared.jobs_cv.notify_one();
        Ok(())
    }

    /// Drains the notify pipe and runs every pending completion closure,
    /// resolving their futures on the calling (reactor) thread.
    pub fn process_ready(&mut self) {
        let mut scratch = [0u8; 256];
        loop {
            match self.notify_rx.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        let drained: Vec<Completion> = {
            let mut completions = self.shared.completions.lock().unwrap();
            completions.drain(..).collect()
        };
        for completion in drained {
            completion();
        }
    }

    /// Signals workers to stop taking new jobs and waits for them to exit.
    /// In-flight jobs are allowed to finish; queued-but-unstarted jobs are
    /// dropped without running.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.jobs_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    pub fn queue_len(&self) -> usize {
        self.shared.jobs.lock().unwrap().len()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut jobs = shared.jobs.lock().unwrap();
            loop {
                if let Some(job) = jobs.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                jobs = shared.jobs_cv.wait(jobs).unwrap();
            }
        };
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn submit_resolves_future_after_process_ready() {
        let pool = Pool::new(2, 16).unwrap();
        let future: Future<i32> = Future::new();
        pool.submit(future.clone(), || Ok(21 * 2)).unwrap();

        let mut pool = pool;
        // Give the worker a moment; in the real reactor this is driven by
        // backend readiness on `notify_fd()`, not a sleep.
        std::thread::sleep(Duration::from_millis(50));
        pool.process_ready();

        assert_eq!(future.result(), Some(42));
        pool.shutdown();
    }

    #[test]
    fn a_panicking_thunk_fails_the_future_instead_of_killing_the_worker() {
        let mut pool = Pool::new(1, 16).unwrap();
        let boom: Future<i32> = Future::new();
        pool.submit(boom.clone(), || panic!("thunk bug")).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pool.process_ready();
        assert!(boom.is_failed());

        // the worker thread must still be alive to serve the next job
        let next: Future<i32> = Future::new();
        pool.submit(next.clone(), || Ok(7)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pool.process_ready();
        assert_eq!(next.result(), Some(7));
        pool.shutdown();
    }

    #[test]
    fn submission_over_capacity_is_rejected() {
        let pool = Pool::new(1, 0).unwrap();
        let future: Future<i32> = Future::new();
        let err = pool.submit(future, || Ok(1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::PoolSubmissionFull);
        pool.shutdown();
    }
}
