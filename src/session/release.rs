//! Freigabeliste einer Session
//!
//! Jede belegte Ressource legt beim Belegen eine Freigabe-Aktion ab.
//! Beim Beenden wird die Liste genau einmal abgearbeitet, rückwärts in
//! Belegungsreihenfolge. Fehler und Panics einzelner Aktionen werden
//! gesammelt, die übrigen Aktionen laufen trotzdem.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Eine fehlgeschlagene Freigabe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseFailure {
    pub resource: String,
    pub reason: String,
}

impl ReleaseFailure {
    pub fn new(resource: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.reason)
    }
}

type ReleaseAction = Box<dyn FnOnce() -> BoxFuture<'static, Vec<ReleaseFailure>> + Send>;

#[derive(Default)]
pub struct ReleaseList {
    actions: Vec<(String, ReleaseAction)>,
}

impl ReleaseList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legt eine einzelne Freigabe ab
    pub fn push<F, Fut, E>(&mut self, resource: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let resource = resource.into();
        let label = resource.clone();
        self.actions.push((
            resource,
            Box::new(move || {
                async move {
                    match action().await {
                        Ok(()) => Vec::new(),
                        Err(e) => vec![ReleaseFailure::new(label, e)],
                    }
                }
                .boxed()
            }),
        ));
    }

    /// Legt eine Freigabe ab, die selbst mehrere Schritte sammelt
    pub fn push_group<F, Fut>(&mut self, resource: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Vec<ReleaseFailure>> + Send + 'static,
    {
        self.actions
            .push((resource.into(), Box::new(move || action().boxed())));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Entnimmt alle Aktionen; die Liste bleibt leer zurück
    pub fn take(&mut self) -> ReleaseList {
        std::mem::take(self)
    }

    /// Führt alle Aktionen aus und sammelt Fehler
    pub async fn release_all(self) -> Vec<ReleaseFailure> {
        let mut failures = Vec::new();

        for (resource, action) in self.actions.into_iter().rev() {
            tracing::debug!("Releasing {}", resource);
            match AssertUnwindSafe(action()).catch_unwind().await {
                Ok(mut step) => failures.append(&mut step),
                Err(_) => failures.push(ReleaseFailure::new(resource, "release panicked")),
            }
        }

        for failure in &failures {
            tracing::warn!("Release failed: {}", failure);
        }
        failures
    }
}

impl fmt::Debug for ReleaseList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(resource, _)| resource))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_every_action_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ReleaseList::new();

        for name in ["tracks", "channel", "peer"] {
            let log = Arc::clone(&log);
            list.push(name, move || async move {
                log.lock().push(name);
                Ok::<_, String>(())
            });
        }

        assert!(list.release_all().await.is_empty());
        assert_eq!(*log.lock(), vec!["peer", "channel", "tracks"]);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_cleanup() {
        let ran = Arc::new(Mutex::new(0));
        let mut list = ReleaseList::new();

        let counter = Arc::clone(&ran);
        list.push("camera", move || async move {
            *counter.lock() += 1;
            Ok::<_, String>(())
        });
        list.push("socket", || async { Err::<(), _>("already closed") });
        list.push_group("relay", || async {
            let failures: Vec<ReleaseFailure> = Vec::new();
            if failures.is_empty() {
                panic!("sdk crashed");
            }
            failures
        });

        let failures = list.release_all().await;
        assert_eq!(*ran.lock(), 1);
        assert_eq!(
            failures,
            vec![
                ReleaseFailure::new("relay", "release panicked"),
                ReleaseFailure::new("socket", "already closed"),
            ]
        );
    }

    #[tokio::test]
    async fn take_leaves_an_empty_list() {
        let mut list = ReleaseList::new();
        list.push("x", || async { Ok::<_, String>(()) });

        let taken = list.take();
        assert!(list.is_empty());
        assert_eq!(taken.len(), 1);
    }
}
