use crate::error::ExtractionError;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<(), ExtractionError> {
        if self.is_cancelled() {
            tracing::debug!(stage, "operation cancelled");
            return Err(ExtractionError::Cancelled);
        }
        Ok(())
    }
}

/// Session generation counter. Every restart or cancel moves it forward so
/// events issued for an older generation can be recognised and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }

    pub(crate) fn advance(&mut self) -> Generation {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_reports_stage_error() {
        let token = CancellationToken::new();
        assert!(token.check_cancelled("page").is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check_cancelled("page"),
            Err(ExtractionError::Cancelled)
        ));
    }

    #[test]
    fn generation_advances_monotonically() {
        let mut generation = Generation::default();
        let first = generation.advance();
        let second = generation.advance();
        assert!(second > first);
        assert_eq!(second.value(), 2);
    }
}
