//! Relay core: the sole arbiter of what enters and leaves the broadcast
//! channel.
//!
//! Every inbound producer frame is relayed to all displays immediately, with
//! no dependency on the generation capability. Eligible events additionally
//! spawn an independent reaction chain (typing indicator, capability call,
//! result broadcast) whose failures never disturb the raw relay or any other
//! chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cohost_core::capability::{GenerateOptions, GenerationBackend};
use cohost_core::events::{self, OverlayEvent};

use crate::client::ClientRegistry;

/// Reply shown when the capability call fails or times out.
const FALLBACK_REPLY: &str = "Core overloaded.";
/// Reply shown while the capability is still initializing.
const NOT_READY_REPLY: &str = "Still booting up...";

/// Fixed audience-facing framing for reaction prompts.
fn build_prompt(context: &str) -> String {
    format!(
        "You are an AI co-host for a tech stream. The streamer just highlighted \
         this content on screen:\n\"{context}\"\n\n\
         Give a witty, short (1-2 sentences) reaction to it for the live audience. \
         Do NOT introduce yourself as an AI, just give direct, snappy commentary."
    )
}

/// Relay-level generation constants. Fixed configuration, not per-request
/// input.
#[derive(Clone, Debug)]
pub struct ReactionConfig {
    pub max_tokens: u32,
    pub temperature: f64,
    /// Upper bound on one capability call, so a hung backend cannot wedge
    /// the typing indicator.
    pub timeout: Duration,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.8,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Receives inbound events from any producer, rebroadcasts them, and drives
/// asynchronous generation augmentation for eligible events.
pub struct Relay {
    registry: Arc<ClientRegistry>,
    backend: Arc<dyn GenerationBackend>,
    config: ReactionConfig,
}

impl Relay {
    pub fn new(
        registry: Arc<ClientRegistry>,
        backend: Arc<dyn GenerationBackend>,
        config: ReactionConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    /// Process one raw producer frame.
    ///
    /// The raw relay (step 2) always happens before any reaction for the
    /// same event; reactions for different events may complete in any order.
    pub fn handle_inbound(&self, raw: &str) {
        let event = events::parse_inbound(raw);
        tracing::debug!(kind = event.kind(), "inbound event");

        broadcast_event(&self.registry, &event);

        let Some(context) = event.reaction_context() else {
            return;
        };

        if !self.backend.is_ready() {
            broadcast_event(&self.registry, &OverlayEvent::ai_text(NOT_READY_REPLY));
            return;
        }

        let registry = Arc::clone(&self.registry);
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let context = context.to_string();
        tokio::spawn(run_reaction(registry, backend, config, context));
    }
}

/// Serialize once and fan out to every open display connection.
fn broadcast_event(registry: &ClientRegistry, event: &OverlayEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            registry.broadcast_all(&json);
        }
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "failed to serialize event");
        }
    }
}

/// One reaction chain: typing on, bounded capability call, typing off,
/// result (or the fixed fallback). Fully isolated from the relay loop.
async fn run_reaction(
    registry: Arc<ClientRegistry>,
    backend: Arc<dyn GenerationBackend>,
    config: ReactionConfig,
    context: String,
) {
    broadcast_event(&registry, &OverlayEvent::typing(true));

    let prompt = build_prompt(&context);
    let options = GenerateOptions {
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };

    let outcome = tokio::time::timeout(config.timeout, backend.generate(&prompt, &options)).await;

    broadcast_event(&registry, &OverlayEvent::typing(false));

    let reply = match outcome {
        Ok(Ok(text)) => OverlayEvent::ai_text(text.trim()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, error_kind = e.error_kind(), "generation failed");
            OverlayEvent::ai_text(FALLBACK_REPLY)
        }
        Err(_) => {
            tracing::warn!(timeout = ?config.timeout, "generation timed out");
            OverlayEvent::ai_text(FALLBACK_REPLY)
        }
    };

    broadcast_event(&registry, &reply);
}

/// Forward every capability progress notice to all displays, verbatim and in
/// order, until the capability's channel closes.
pub fn spawn_progress_forwarder(
    registry: Arc<ClientRegistry>,
    backend: &Arc<dyn GenerationBackend>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = backend.subscribe_progress();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    broadcast_event(&registry, &OverlayEvent::LlmProgress { payload: notice });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "progress forwarder lagged, dropped notices");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("progress channel closed");
                    break;
                }
            }
        }
    })
}
