//! Fixed-size pool of named worker threads fed from a shared job queue

use parking_lot::Mutex;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads pulling jobs in FIFO order
pub(crate) struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<name>-<n>`
    pub(crate) fn new(size: usize, name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(size),
        };

        for index in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || loop {
                    // Lock only around recv so other workers can dequeue while this one runs
                    let job = receiver.lock().recv();
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    /// Queue a job; hands it back if the pool no longer accepts work
    pub(crate) fn execute(&self, job: Job) -> Result<(), Job> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|mpsc::SendError(job)| job),
            None => Err(job),
        }
    }

    /// Stop accepting jobs, run everything already queued, and join the workers
    pub(crate) fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                debug!("[POOL] {} exited by panic", name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets detached workers finish and exit on their own
        self.sender.take();
    }
}
