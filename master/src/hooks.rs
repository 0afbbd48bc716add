use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::Semaphore, time::timeout};
use tracing::error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("panicked")]
    Panicked,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Pool acotado de hilos bloqueantes para los hooks de verificación.
///
/// Cada llamada ocupa un permiso mientras corre. Si vence el plazo el
/// llamador recibe `Timeout` y sigue adelante; el hilo colgado conserva su
/// permiso hasta terminar, así un hook que no vuelve nunca sólo consume un
/// slot del pool.
#[derive(Debug, Clone)]
pub struct HookRunner {
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl HookRunner {
    pub fn new(timeout: Duration, workers: usize) -> Self {
        Self {
            timeout,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub async fn run<T, F>(&self, hook: F) -> Result<T, HookError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match timeout(self.timeout, self.call(hook)).await {
            Ok(res) => res,
            Err(_) => Err(HookError::Timeout(self.timeout)),
        }
    }

    /// Como `run`, pero si vence el plazo el hook sigue en segundo plano y
    /// su valor tardío se entrega a `late` para que la tarea lo deshaga.
    pub async fn run_or_recover<T, F, L>(&self, hook: F, late: L) -> Result<T, HookError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
        L: FnOnce(T) + Send + 'static,
    {
        let mut call = tokio::spawn(self.call(hook));
        match timeout(self.timeout, &mut call).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) if e.is_panic() => Err(HookError::Panicked),
            Ok(Err(_)) => Err(HookError::Cancelled),
            Err(_) => {
                tokio::spawn(async move {
                    if let Ok(Ok(value)) = call.await {
                        late(value);
                    }
                });
                Err(HookError::Timeout(self.timeout))
            }
        }
    }

    fn call<T, F>(&self, hook: F) -> impl Future<Output = Result<T, HookError>> + Send + 'static
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| HookError::Cancelled)?;

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                hook()
            });

            match handle.await {
                Ok(res) => res.map_err(HookError::Failed),
                Err(e) if e.is_panic() => Err(HookError::Panicked),
                Err(_) => Err(HookError::Cancelled),
            }
        }
    }
}

/// Hook rápido llamado en el hilo actual, con el lock del manager tomado.
/// Un pánico se loguea y se devuelve `false`; nunca sube al llamador.
pub fn guarded(task_id: &str, hook: &'static str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(_) => {
            error!("hook {} de la tarea {} entró en pánico", hook, task_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_hook_value() {
        let hooks = HookRunner::new(Duration::from_secs(1), 2);
        let v = hooks.run(|| Ok(40 + 2)).await.unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn hook_error_is_reported_as_failed() {
        let hooks = HookRunner::new(Duration::from_secs(1), 2);
        let res: Result<bool, _> = hooks.run(|| anyhow::bail!("boom")).await;
        assert!(matches!(res, Err(HookError::Failed(_))));
    }

    #[tokio::test]
    async fn panicking_hook_does_not_propagate() {
        let hooks = HookRunner::new(Duration::from_secs(1), 2);
        let res: Result<bool, _> = hooks.run(|| panic!("hook roto")).await;
        assert!(matches!(res, Err(HookError::Panicked)));
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let hooks = HookRunner::new(Duration::from_millis(20), 1);
        let res = hooks
            .run(|| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(true)
            })
            .await;
        assert!(matches!(res, Err(HookError::Timeout(_))));
    }

    #[tokio::test]
    async fn late_value_is_handed_back_after_timeout() {
        let hooks = HookRunner::new(Duration::from_millis(20), 1);
        let (tx, rx) = tokio::sync::oneshot::channel();

        let res = hooks
            .run_or_recover(
                || {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(7)
                },
                move |v| {
                    let _ = tx.send(v);
                },
            )
            .await;

        assert!(matches!(res, Err(HookError::Timeout(_))));
        let late = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late, 7);
    }

    #[tokio::test]
    async fn value_in_time_skips_recovery() {
        let hooks = HookRunner::new(Duration::from_secs(1), 1);
        let recovered = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = recovered.clone();

        let v = hooks
            .run_or_recover(|| Ok(3), move |_| flag.store(true, std::sync::atomic::Ordering::SeqCst))
            .await
            .unwrap();

        assert_eq!(v, 3);
        tokio::task::yield_now().await;
        assert!(!recovered.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn guarded_swallows_panics() {
        assert!(guarded("t1", "restart", || {}));
        assert!(!guarded("t1", "restart", || panic!("restart roto")));
    }
}
