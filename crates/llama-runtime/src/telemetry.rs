//! Per-call generation telemetry.
//!
//! An [`InferenceTimer`] follows one generation call through priming and
//! decoding and hands an [`InferenceMetrics`] report to a [`TelemetryHook`]
//! when the call succeeds. Built-in hooks: [`NoopTelemetry`] (default),
//! [`LogTelemetry`] (keeps reports for inspection) and [`TracingTelemetry`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Which generation operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Chat,
    Completion,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallKind::Chat => "chat",
            CallKind::Completion => "completion",
        })
    }
}

/// Report for one successful generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceMetrics {
    pub kind: CallKind,
    /// Prompt tokens decoded while priming.
    pub prompt_tokens: usize,
    /// Tokens sampled and emitted.
    pub generated_tokens: usize,
    /// Call start to end of priming, i.e. to the first logits.
    pub time_to_first_token: Duration,
    /// Call start to finish.
    pub elapsed: Duration,
}

impl InferenceMetrics {
    /// Decode throughput. Priming time is excluded; zero when nothing was
    /// emitted or no decode time elapsed.
    pub fn tokens_per_sec(&self) -> f64 {
        let decode = self.elapsed.saturating_sub(self.time_to_first_token);
        if self.generated_tokens == 0 || decode.is_zero() {
            return 0.0;
        }
        self.generated_tokens as f64 / decode.as_secs_f64()
    }
}

/// Receives timing events from generation calls. Every method defaults to
/// doing nothing.
pub trait TelemetryHook: Send + Sync {
    fn on_primed(&self, _kind: CallKind, _time_to_first_token: Duration) {}

    /// `index` counts from 1.
    fn on_token(&self, _kind: CallKind, _index: usize, _elapsed: Duration) {}

    /// Only successful calls report; a failed call drops its timer.
    fn on_complete(&self, _metrics: &InferenceMetrics) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

#[derive(Debug, Default)]
struct Recorded {
    last: Option<InferenceMetrics>,
    completed: usize,
}

/// Keeps the most recent report and a count of completed calls. Clones share
/// the same record.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    record: Arc<Mutex<Recorded>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
            .clone()
    }

    pub fn completed_calls(&self) -> usize {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_complete(&self, metrics: &InferenceMetrics) {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        record.last = Some(metrics.clone());
        record.completed += 1;
    }
}

/// Emits each report as an `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_complete(&self, m: &InferenceMetrics) {
        tracing::info!(
            kind = %m.kind,
            prompt_tokens = m.prompt_tokens,
            generated_tokens = m.generated_tokens,
            ttft_ms = m.time_to_first_token.as_secs_f64() * 1000.0,
            tokens_per_sec = m.tokens_per_sec(),
            elapsed_ms = m.elapsed.as_secs_f64() * 1000.0,
            "generation complete"
        );
    }
}

/// Clock for one generation call. Create it before priming, mark priming
/// and each emitted token, then [`finish`](Self::finish) on success.
pub struct InferenceTimer {
    kind: CallKind,
    prompt_tokens: usize,
    started: Instant,
    primed_after: Option<Duration>,
    emitted: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl InferenceTimer {
    pub fn new(kind: CallKind, prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            kind,
            prompt_tokens,
            started: Instant::now(),
            primed_after: None,
            emitted: 0,
            hook,
        }
    }

    pub fn mark_primed(&mut self) {
        let ttft = self.started.elapsed();
        self.primed_after = Some(ttft);
        self.hook.on_primed(self.kind, ttft);
    }

    pub fn mark_emitted(&mut self) {
        self.emitted += 1;
        self.hook
            .on_token(self.kind, self.emitted, self.started.elapsed());
    }

    pub fn finish(self) -> InferenceMetrics {
        let metrics = InferenceMetrics {
            kind: self.kind,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.emitted,
            time_to_first_token: self.primed_after.unwrap_or_default(),
            elapsed: self.started.elapsed(),
        };
        self.hook.on_complete(&metrics);
        metrics
    }
}
