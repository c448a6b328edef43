//! services/job_executor.rs
//! Ejecuta los trabajos masivos fuera de la petición que los creó.
//!
//! Cada trabajo es una tarea de tokio independiente; un semáforo limita cuántos
//! corren a la vez (los demás esperan en `pending`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Señal de cancelación compartida entre el executor y la tarea.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle de un trabajo encolado. Soltarlo no detiene la tarea.
#[derive(Debug)]
pub struct JobHandle {
    operation_id: String,
    handle: JoinHandle<()>,
}

impl JobHandle {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Espera a que la tarea termine.
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .with_context(|| format!("Job task {} panicked", self.operation_id))
    }
}

#[derive(Clone, Debug)]
pub struct JobExecutor {
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl JobExecutor {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        JobExecutor {
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Encola el trabajo y devuelve enseguida; la tarea es dueña de su propio ciclo de vida.
    pub fn spawn<F, Fut>(&self, operation_id: &str, job: F) -> JobHandle
    where
        F: FnOnce(CancelFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let flag = CancelFlag::default();
        self.registry().insert(operation_id.to_string(), flag.clone());

        let fut = job(flag);
        let permits = self.permits.clone();
        let running = self.running.clone();
        let op_id = operation_id.to_string();

        let handle = tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => fut.await,
                Err(e) => log::error!("(job_executor) No permit for job {}: {}", op_id, e),
            }
            running
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&op_id);
        });

        JobHandle {
            operation_id: operation_id.to_string(),
            handle,
        }
    }

    /// Levanta la señal de cancelación. `false` si el trabajo no está en este executor.
    pub fn cancel(&self, operation_id: &str) -> bool {
        match self.registry().get(operation_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_jobs(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelFlag>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
