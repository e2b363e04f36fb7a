//! Scripted backend for deterministic relay tests without a model process.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use cohost_core::capability::{
    CapabilityStatus, GenerateOptions, GenerationBackend, ModelState, ProgressNotice,
};
use cohost_core::errors::CapabilityError;

/// Pre-programmed replies consumed in order by `generate`.
pub enum MockReply {
    Text(String),
    Error(CapabilityError),
    /// Wait a duration, then resolve to the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn delayed_text(delay: Duration, s: &str) -> Self {
        Self::Delay(delay, Box::new(Self::Text(s.to_string())))
    }
}

pub struct MockBackend {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    ready: AtomicBool,
    progress_tx: broadcast::Sender<ProgressNotice>,
}

impl MockBackend {
    pub fn new(replies: Vec<MockReply>) -> Self {
        let (progress_tx, _) = broadcast::channel(64);
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
            progress_tx,
        }
    }

    /// A backend that is still initializing.
    pub fn not_ready() -> Self {
        let backend = Self::new(Vec::new());
        backend.ready.store(false, Ordering::Release);
        backend
    }

    /// Number of `generate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Push a capability notice, as a real backend would out-of-band.
    pub fn emit_progress(&self, notice: ProgressNotice) {
        let _ = self.progress_tx.send(notice);
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), CapabilityError> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String, CapabilityError> {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| CapabilityError::Backend(format!("no reply scripted for call {idx}")))?;

        loop {
            match reply {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    fn status(&self) -> CapabilityStatus {
        CapabilityStatus {
            initialized: self.is_ready(),
            model_loaded: self.is_ready(),
            loaded_model: self.is_ready().then(|| "mock-model".to_string()),
        }
    }

    fn list_available(&self) -> BTreeMap<String, ModelState> {
        BTreeMap::from([(
            "mock-model".to_string(),
            ModelState {
                downloaded: true,
                display_name: "Mock Model".to_string(),
                size_bytes: 0,
            },
        )])
    }

    async fn download(&self, model_id: &str) -> Result<(), CapabilityError> {
        self.emit_progress(ProgressNotice::download_complete(model_id));
        Ok(())
    }

    async fn load(&self, model_id: &str) -> Result<(), CapabilityError> {
        self.emit_progress(ProgressNotice::load_complete(model_id));
        Ok(())
    }

    async fn unload(&self) -> Result<(), CapabilityError> {
        self.emit_progress(ProgressNotice::unload_complete());
        Ok(())
    }

    fn subscribe_progress(&self) -> broadcast::Receiver<ProgressNotice> {
        self.progress_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_consumed_in_order() {
        let mock = MockBackend::new(vec![MockReply::text("first"), MockReply::text("second")]);

        let a = mock
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap();
        let b = mock
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_replies_error() {
        let mock = MockBackend::new(vec![]);
        let result = mock.generate("p", &GenerateOptions::default()).await;
        assert!(matches!(result, Err(CapabilityError::Backend(_))));
    }

    #[tokio::test]
    async fn scripted_error_surfaces() {
        let mock = MockBackend::new(vec![MockReply::Error(CapabilityError::Backend(
            "kv cache full".into(),
        ))]);
        let result = mock.generate("p", &GenerateOptions::default()).await;
        assert!(matches!(result, Err(CapabilityError::Backend(_))));
    }

    #[tokio::test]
    async fn delayed_reply_waits() {
        let mock = MockBackend::new(vec![MockReply::delayed_text(
            Duration::from_millis(50),
            "late",
        )]);

        let start = std::time::Instant::now();
        let text = mock
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "late");
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn not_ready_until_initialized() {
        let mock = MockBackend::not_ready();
        assert!(!mock.is_ready());
        assert!(!mock.status().initialized);

        mock.initialize().await.unwrap();
        assert!(mock.is_ready());
    }

    #[tokio::test]
    async fn progress_subscription_receives_notices() {
        let mock = MockBackend::new(vec![]);
        let mut rx = mock.subscribe_progress();

        mock.emit_progress(ProgressNotice::download_progress("mock-model", 10.0));
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.progress, Some(10.0));
    }
}
