//! Ordered LLM provider chain with per-provider circuit breaking.
//!
//! The breaker tracks consecutive failures per provider name. When
//! failures reach the threshold the circuit *opens* and the provider is
//! skipped. After a cooldown it turns *half-open* and a single trial call
//! is let through; other callers keep skipping the provider until that
//! call reports back or another cooldown passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::providers::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider circuit breaker tracking consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: HashMap<String, u32>,
    last_failure: HashMap<String, Instant>,
    /// Half-open trial calls in flight, by start time.
    trials: HashMap<String, Instant>,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before Open -> HalfOpen.
    pub cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: HashMap::new(),
            last_failure: HashMap::new(),
            trials: HashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    pub fn record_success(&mut self, provider: &str) {
        self.consecutive_failures.remove(provider);
        self.last_failure.remove(provider);
        self.trials.remove(provider);
    }

    pub fn record_failure(&mut self, provider: &str) {
        *self
            .consecutive_failures
            .entry(provider.to_string())
            .or_insert(0) += 1;
        self.last_failure.insert(provider.to_string(), Instant::now());
        self.trials.remove(provider);
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        let failures = self.failure_count(provider);
        if failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        match self.last_failure.get(provider) {
            Some(at) if at.elapsed() < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    pub fn is_available(&self, provider: &str) -> bool {
        !matches!(self.state(provider), CircuitState::Open)
    }

    /// Give back a trial without judging the provider.
    pub fn release(&mut self, provider: &str) {
        self.trials.remove(provider);
    }

    /// Claim the right to call `provider` now. Closed circuits always
    /// grant it; a half-open circuit grants it to one caller at a time.
    /// A trial that never reports back expires after `cooldown`.
    pub fn try_acquire(&mut self, provider: &str) -> bool {
        match self.state(provider) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if let Some(started) = self.trials.get(provider) {
                    if started.elapsed() < self.cooldown {
                        return false;
                    }
                }
                self.trials.insert(provider.to_string(), Instant::now());
                true
            }
        }
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.consecutive_failures.get(provider).copied().unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

/// Primary provider first, fallbacks after, sharing one breaker.
pub struct ProviderChain {
    providers: Vec<Arc<dyn LlmProvider>>,
    breaker: Mutex<CircuitBreaker>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, breaker: CircuitBreaker) -> Self {
        Self {
            providers,
            breaker: Mutex::new(breaker),
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All providers in chain order.
    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    /// Whether any provider's circuit is not open. Claims nothing.
    pub fn any_available(&self) -> bool {
        let breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        self.providers.iter().any(|p| breaker.is_available(p.name()))
    }

    pub fn release(&self, provider: &str) {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(provider);
    }

    /// See [`CircuitBreaker::try_acquire`].
    pub fn try_acquire(&self, provider: &str) -> bool {
        let granted = self
            .breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(provider);
        if !granted {
            tracing::debug!(provider, "Skipping provider with open circuit");
        }
        granted
    }

    pub fn record_success(&self, provider: &str) {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_success(provider);
    }

    pub fn record_failure(&self, provider: &str) {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_failure(provider);
    }

    pub fn circuit_state(&self, provider: &str) -> CircuitState {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state("yandex"), CircuitState::Closed);
        assert!(cb.is_available("yandex"));
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(9999));
        cb.record_failure("yandex");
        assert_eq!(cb.state("yandex"), CircuitState::Closed);
        cb.record_failure("yandex");
        assert_eq!(cb.state("yandex"), CircuitState::Open);
        assert!(!cb.is_available("yandex"));
        assert!(cb.is_available("openai"));
    }

    #[test]
    fn test_success_resets_circuit() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(9999));
        cb.record_failure("openai");
        cb.record_failure("openai");
        cb.record_success("openai");
        assert_eq!(cb.state("openai"), CircuitState::Closed);
        assert_eq!(cb.failure_count("openai"), 0);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure("yandex");
        assert_eq!(cb.state("yandex"), CircuitState::HalfOpen);
        assert!(cb.is_available("yandex"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure("yandex");
        assert!(!cb.try_acquire("yandex"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state("yandex"), CircuitState::HalfOpen);
        assert!(cb.try_acquire("yandex"));
        assert!(!cb.try_acquire("yandex"));
        assert!(cb.try_acquire("openai"));

        cb.release("yandex");
        assert_eq!(cb.failure_count("yandex"), 1);
        assert!(cb.try_acquire("yandex"));

        cb.record_success("yandex");
        assert!(cb.try_acquire("yandex"));
        assert!(cb.try_acquire("yandex"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_expires() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure("yandex");
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.try_acquire("yandex"));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.try_acquire("yandex"));
    }
}
