use crate::db::mark_exclusive_thread;
use crate::import::types::ImportError;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed pool of import worker threads draining one FIFO queue
///
/// Each worker drives one job at a time to completion, so a pool of degree
/// 1 runs imports strictly in submission order. Workers run on their own
/// threads, keeping hashing and decompression off the caller's runtime
/// workers, while spawned I/O still lands on the shared runtime.
pub struct ImportScheduler {
    name: String,
    degree: usize,
    job_tx: Mutex<Option<Sender<Job>>>,
}

impl ImportScheduler {
    pub fn new(name: &str, degree: usize, runtime_handle: tokio::runtime::Handle) -> Self {
        let degree = degree.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for index in 0..degree {
            let job_rx = job_rx.clone();
            let runtime_handle = runtime_handle.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-import-{}", name, index))
                .spawn(move || run_import_worker(job_rx, runtime_handle));
            if let Err(e) = spawned {
                error!("Failed to start import worker {} for {}: {}", index, name, e);
            }
        }

        info!("Started {} import worker(s) for {}", degree, name);
        ImportScheduler {
            name: name.to_string(),
            degree,
            job_tx: Mutex::new(Some(job_tx)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Queue `future` immediately and return a handle to its output.
    ///
    /// The job is enqueued when this is called, not when the returned future
    /// is first polled, so call order is queue order.
    pub fn schedule<F, T>(&self, future: F) -> impl Future<Output = Result<T, ImportError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // Receiver gone means the caller stopped waiting
            let _ = result_tx.send(future.await);
        });

        let queued = match self.job_tx.lock().unwrap().as_ref() {
            Some(job_tx) => job_tx.send(job).is_ok(),
            None => false,
        };

        async move {
            if !queued {
                return Err(ImportError::SchedulerClosed);
            }
            result_rx.await.map_err(|_| ImportError::SchedulerClosed)
        }
    }

    /// Stop accepting jobs; workers exit once the queue is drained
    pub fn shutdown(&self) {
        if self.job_tx.lock().unwrap().take().is_some() {
            debug!("Import scheduler {} shutting down", self.name);
        }
    }
}

impl Drop for ImportScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_import_worker(job_rx: Arc<Mutex<Receiver<Job>>>, runtime_handle: tokio::runtime::Handle) {
    mark_exclusive_thread();

    loop {
        let next = job_rx.lock().unwrap().recv();
        match next {
            Ok(job) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| runtime_handle.block_on(job)));
                if outcome.is_err() {
                    error!("Import job panicked; worker continues with the next job");
                }
            }
            Err(_) => {
                debug!("Import queue closed, worker exiting");
                break;
            }
        }
    }
}
