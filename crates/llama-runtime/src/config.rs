//! Runtime configuration, fixed when the engine is constructed.

use std::fmt;
use std::sync::Arc;

use crate::telemetry::{NoopTelemetry, TelemetryHook};

/// Hard limits of the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationLimits {
    /// Largest piece a single token may decode to. Longer pieces fail the call.
    pub max_piece_bytes: usize,
    /// Tokens a completion call emits at most before stopping.
    pub completion_extra_tokens: usize,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_piece_bytes: 256,
            completion_extra_tokens: 32,
        }
    }
}

/// Configuration of a [`NativeEngine`](crate::NativeEngine).
#[derive(Clone)]
pub struct EngineConfig {
    pub limits: GenerationLimits,
    /// Receives one report per successful generation call.
    pub telemetry: Arc<dyn TelemetryHook>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: GenerationLimits::default(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    pub fn with_limits(mut self, limits: GenerationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_telemetry(mut self, hook: impl TelemetryHook + 'static) -> Self {
        self.telemetry = Arc::new(hook);
        self
    }
}
