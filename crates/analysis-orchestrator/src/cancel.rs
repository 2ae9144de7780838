use analysis_core::FetchError;
use std::sync::atomic::{AtomicU64, Ordering};
pub use tokio_util::sync::CancellationToken;

/// Classified check on a caller's cancellation token.
pub trait CancellationCheck {
    /// `Err` of kind `Cancelled` once the token has been cancelled
    fn check(&self) -> Result<(), FetchError>;
}

impl CancellationCheck for CancellationToken {
    fn check(&self) -> Result<(), FetchError> {
        if self.is_cancelled() {
            Err(FetchError::cancelled("request cancelled by caller"))
        } else {
            Ok(())
        }
    }
}

/// Generation stamp handed out when a subject becomes current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectTicket(u64);

/// Tracks which subject (instrument + granularity) the consumer is showing.
///
/// Every switch bumps the generation; results fetched under an older ticket
/// are rejected by `commit`.
#[derive(Debug, Default)]
pub struct SubjectTracker {
    generation: AtomicU64,
}

impl SubjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a new subject current and return its ticket
    pub fn begin(&self) -> SubjectTicket {
        SubjectTicket(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn current(&self) -> SubjectTicket {
        SubjectTicket(self.generation.load(Ordering::Acquire))
    }

    pub fn is_current(&self, ticket: SubjectTicket) -> bool {
        self.current() == ticket
    }

    /// Hand `value` back only if `ticket` is still current and `token` was not cancelled.
    pub fn commit<T>(&self, ticket: SubjectTicket, token: &CancellationToken, value: T) -> Option<T> {
        if token.is_cancelled() {
            tracing::debug!("Discarding result for cancelled request");
            return None;
        }
        if !self.is_current(ticket) {
            tracing::debug!(
                "Discarding stale result (ticket {}, current {})",
                ticket.0,
                self.current().0
            );
            return None;
        }
        Some(value)
    }
}
