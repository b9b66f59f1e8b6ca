//! In-memory engine for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};

use super::{ContainerEngine, PullProgress};
use crate::error::EngineError;
use crate::unit::UnitSpec;

/// Engine call that a [`MockEngine`] can fail or slow down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockStep {
    ImageExists,
    /// The pull request itself is refused.
    Pull,
    /// The pull stream emits an in-band error event after its normal events.
    PullEvent,
    Create,
    Start,
    Inspect,
    Remove,
}

/// A configurable mock engine.
///
/// Tracks call counts via atomics. Images become cached once a pull stream
/// has been read to its end, so a second provision of the same image does not
/// pull again under `PullPolicy::IfNotPresent`.
pub struct MockEngine {
    pub unit_id: String,
    /// `None` simulates an engine that reports no sandbox key.
    pub sandbox_key: Option<String>,
    pub pull_events: Vec<PullProgress>,

    pub exists_count: AtomicUsize,
    pub pull_count: AtomicUsize,
    pub create_count: AtomicUsize,
    pub start_count: AtomicUsize,
    pub inspect_count: AtomicUsize,
    pub remove_count: AtomicUsize,

    /// Set while a pull stream has been handed out but not read to its end.
    pub pull_in_flight: AtomicBool,
    /// Set if any other call arrived while a pull was still in flight.
    pub call_during_pull: AtomicBool,

    cached: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<MockStep, EngineError>>,
    delays: Mutex<HashMap<MockStep, Duration>>,
    specs: Mutex<Vec<UnitSpec>>,
    removed: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new(unit_id: &str, sandbox_key: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            sandbox_key: Some(sandbox_key.to_string()),
            pull_events: vec![
                PullProgress::status("Pulling from library/busybox"),
                PullProgress {
                    id: Some("9ad63333ebc9".into()),
                    status: Some("Downloading".into()),
                    progress: Some("[=====>    ] 1.1MB/2.2MB".into()),
                    error: None,
                },
                PullProgress {
                    id: Some("9ad63333ebc9".into()),
                    status: Some("Pull complete".into()),
                    progress: None,
                    error: None,
                },
                PullProgress::status("Status: Downloaded newer image"),
            ],
            exists_count: AtomicUsize::new(0),
            pull_count: AtomicUsize::new(0),
            create_count: AtomicUsize::new(0),
            start_count: AtomicUsize::new(0),
            inspect_count: AtomicUsize::new(0),
            remove_count: AtomicUsize::new(0),
            pull_in_flight: AtomicBool::new(false),
            call_during_pull: AtomicBool::new(false),
            cached: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            specs: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn without_sandbox_key(mut self) -> Self {
        self.sandbox_key = None;
        self
    }

    pub fn with_cached_image(self, image: &str) -> Self {
        self.cached.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn failing_at(self, step: MockStep, error: EngineError) -> Self {
        self.failures.lock().unwrap().insert(step, error);
        self
    }

    pub fn delayed_at(self, step: MockStep, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(step, delay);
        self
    }

    /// Every spec passed to `create_unit`, in call order.
    pub fn created_specs(&self) -> Vec<UnitSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Ids passed to `remove_unit`, in call order.
    pub fn removed_units(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn is_cached(&self, image: &str) -> bool {
        self.cached.lock().unwrap().contains(image)
    }

    fn failure(&self, step: MockStep) -> Option<EngineError> {
        self.failures.lock().unwrap().get(&step).cloned()
    }

    async fn enter(&self, step: MockStep) -> Result<(), EngineError> {
        if self.pull_in_flight.load(Ordering::SeqCst) {
            self.call_during_pull.store(true, Ordering::SeqCst);
        }
        let delay = self.delays.lock().unwrap().get(&step).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure(step) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Clears `pull_in_flight` when the pull stream ends or is dropped early.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ContainerEngine for MockEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        self.exists_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockStep::ImageExists).await?;
        Ok(self.is_cached(image))
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress, EngineError>> {
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure(MockStep::Pull) {
            return stream::once(async move { Err(err) }).boxed();
        }
        self.pull_in_flight.store(true, Ordering::SeqCst);

        let mut events = self.pull_events.clone();
        if let Some(err) = self.failure(MockStep::PullEvent) {
            events.push(PullProgress::failed(err.to_string()));
        }
        let delay = self.delays.lock().unwrap().get(&MockStep::Pull).copied();
        let failed = events.iter().any(|e| e.error.is_some());

        let in_flight = InFlight(&self.pull_in_flight);
        stream::unfold((events.into_iter(), in_flight), move |(mut events, in_flight)| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match events.next() {
                Some(event) => Some((Ok(event), (events, in_flight))),
                None => {
                    if !failed {
                        self.cached.lock().unwrap().insert(image.to_string());
                    }
                    None
                }
            }
        })
        .boxed()
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<String, EngineError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockStep::Create).await?;
        self.specs.lock().unwrap().push(spec.clone());
        Ok(self.unit_id.clone())
    }

    async fn start_unit(&self, _unit_id: &str) -> Result<(), EngineError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockStep::Start).await
    }

    async fn sandbox_key(&self, _unit_id: &str) -> Result<Option<String>, EngineError> {
        self.inspect_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockStep::Inspect).await?;
        Ok(self.sandbox_key.clone())
    }

    async fn remove_unit(&self, unit_id: &str) -> Result<(), EngineError> {
        self.remove_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockStep::Remove).await?;
        self.removed.lock().unwrap().push(unit_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_pull_stream_clears_in_flight() {
        let engine = MockEngine::new("abc123", "/var/run/netns/abc123");
        let mut stream = engine.pull_image("busybox:latest");
        assert!(stream.next().await.is_some());
        assert!(engine.pull_in_flight.load(Ordering::SeqCst));
        drop(stream);

        assert!(!engine.pull_in_flight.load(Ordering::SeqCst));
        assert!(!engine.is_cached("busybox:latest"));
        engine
            .create_unit(&UnitSpec::isolated(
                "busybox:latest",
                &Default::default(),
                HashMap::new(),
            ))
            .await
            .unwrap();
        assert!(!engine.call_during_pull.load(Ordering::SeqCst));
    }
}
