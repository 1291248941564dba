//! Handles on tasks submitted to the Process.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::{Error, Result};

/// A cloneable "this task has finished" signal.
#[derive(Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    pub fn ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for completion, raising `Timeout` when `timeout` elapses first.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.rx.clone();
        let done = async move {
            // a dropped sender means the recording task is gone
            let _ = rx.wait_for(|done| *done).await;
        };
        match timeout {
            Some(t) => tokio::time::timeout(t, done)
                .await
                .map_err(|_| Error::Timeout(format!("task did not complete within {:?}", t))),
            None => {
                done.await;
                Ok(())
            }
        }
    }
}

/// A handle on a spawned task's result.
pub struct Spawned<T> {
    done: DoneSignal,
    result: Arc<Mutex<Option<Result<T>>>>,
}

impl<T> Clone for Spawned<T> {
    fn clone(&self) -> Self {
        Spawned {
            done: self.done.clone(),
            result: self.result.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Spawned<T> {
    /// Run `future` on the tokio pool. A panic is recorded as an error.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let inner = tokio::spawn(future);
        tokio::spawn(async move {
            let outcome = match inner.await {
                Ok(r) => r,
                Err(e) => Err(Error::Other(format!("spawned task failed: {}", e))),
            };
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
            let _ = tx.send(true);
        });
        Spawned {
            done: DoneSignal { rx },
            result,
        }
    }

    pub fn ready(&self) -> bool {
        self.done.ready()
    }

    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        self.done.wait(timeout).await
    }

    /// The task's result; `Unexpected` if it has not finished.
    pub fn get(&self) -> Result<T> {
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| Err(Error::Unexpected("spawned task not finished".to_string())))
    }

    /// Wait, then return the result.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<T> {
        self.wait(timeout).await?;
        self.get()
    }

    pub fn done_signal(&self) -> DoneSignal {
        self.done.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_available_after_wait() {
        let s = Spawned::spawn(async { Ok(41 + 1) });
        s.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert!(s.ready());
        assert_eq!(s.get().unwrap(), 42);
    }

    #[tokio::test]
    async fn timeout_is_distinct_from_failure() {
        let s: Spawned<()> = Spawned::spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        let err = s.wait(Some(Duration::from_millis(20))).await.unwrap_err();
        assert_eq!(err.kind(), malcolm_core::ErrorKind::Timeout);
        assert!(s.get().is_err());

        let failed: Spawned<()> = Spawned::spawn(async { Err(Error::Other("boom".into())) });
        assert_eq!(failed.join(None).await.unwrap_err(), Error::Other("boom".into()));
    }

    #[tokio::test]
    async fn panics_are_recorded() {
        let s: Spawned<()> = Spawned::spawn(async {
            if true {
                panic!("oops");
            }
            Ok(())
        });
        let err = s.join(Some(Duration::from_secs(1))).await.unwrap_err();
        assert!(err.message().contains("spawned task failed"));
    }
}
