/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A small pool of worker threads that asynchronous jobs are dispatched to.
//!
//! Jobs are dispatched to the workers in round-robin order. A pool with zero workers runs every job
//! inline, on the thread that dispatches it: this is what single-threaded deployments and tests use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// The thread that a job was dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Context {
    /// The job ran inline on the dispatching thread.
    Control,

    /// The job was queued on the worker with this index.
    Worker(usize),
}

pub struct WorkerPool {
    workers: Mutex<Vec<Worker>>,
    worker_count: usize,
    next: AtomicUsize,
}

struct Worker {
    queue: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start a pool with `worker_count` worker threads.
    pub fn new(worker_count: usize) -> WorkerPool {
        let workers = (0..worker_count)
            .map(|idx| {
                let (queue, jobs) = mpsc::channel::<Job>();
                // Like `thread::spawn`, panics if the OS cannot create the thread.
                let handle = thread::Builder::new()
                    .name(format!("worker-{}", idx))
                    .spawn(move || {
                        for job in jobs {
                            job()
                        }
                    })
                    .expect("Failed to spawn a worker thread");
                Worker {
                    queue: Some(queue),
                    handle: Some(handle),
                }
            })
            .collect();

        WorkerPool {
            workers: Mutex::new(workers),
            worker_count,
            next: AtomicUsize::new(0),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run `job` on the next worker in round-robin order, or inline if the pool has no workers.
    ///
    /// # Panics
    ///
    /// Panics if the chosen worker thread has exited, which happens only if a previous job on it
    /// panicked or if the pool was shut down.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Context {
        if self.worker_count == 0 {
            job();
            return Context::Control;
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.worker_count;
        let workers = self.workers.lock().unwrap();
        match workers[idx].queue.as_ref() {
            Some(queue) if queue.send(Box::new(job)).is_ok() => Context::Worker(idx),
            _ => panic!("Worker thread {} is no longer running", idx),
        }
    }

    /// Stop accepting jobs, wait for every queued job to finish, and join the worker threads.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap();
        workers.iter_mut().for_each(|worker| drop(worker.queue.take()));
        let current = thread::current().id();
        for worker in workers.iter_mut() {
            // A worker cannot join itself. This happens if the last handle to the pool is dropped by a job.
            if let Some(handle) = worker.handle.take() {
                if handle.thread().id() != current && handle.join().is_err() {
                    log::error!("A worker thread panicked while running a job");
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown()
    }
}
