// Failure taxonomy for the booking flow.
// Every error that leaves this crate is a FlowError carrying the stage it
// originated from and a normalized kind; raw upstream payloads never escape.

use std::fmt;

use thiserror::Error;

/// Stages of the booking state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Authenticating,
    Searching,
    RoomLookup,
    Blocking,
    Booking,
    Voucher,
    Confirmed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Authenticating => "AUTHENTICATING",
            Stage::Searching => "SEARCHING",
            Stage::RoomLookup => "ROOM_LOOKUP",
            Stage::Blocking => "BLOCKING",
            Stage::Booking => "BOOKING",
            Stage::Voucher => "VOUCHER",
            Stage::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Block-stage failures. All of these invalidate the hold: the caller must
/// restart from the Searching stage, holds are never renewed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFailure {
    HoldExpired,
    PriceChanged,
    NoAvailability,
    Other,
}

/// Book-stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookFailure {
    /// The call timed out after the supplier may have committed the
    /// reservation. Must not be retried; reconcile out of band.
    AmbiguousBooking,
    /// Supplier declined the booking; safe to report to the user.
    Rejected,
    /// The mapper's mandatory-field check failed before any network call.
    ValidationFailed,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Search,
    Room,
    Block(BlockFailure),
    Book(BookFailure),
    /// Circuit breaker is OPEN; no network call was attempted.
    SupplierUnavailable,
    Timeout,
    Network,
    /// An identifier (trace id, result index, booking id) was missing or
    /// belongs to a different supplier or flow.
    InvalidIdentifier,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Search => "SEARCH_ERROR",
            ErrorKind::Room => "ROOM_ERROR",
            ErrorKind::Block(BlockFailure::HoldExpired) => "HOLD_EXPIRED",
            ErrorKind::Block(BlockFailure::PriceChanged) => "PRICE_CHANGED",
            ErrorKind::Block(BlockFailure::NoAvailability) => "NO_AVAILABILITY",
            ErrorKind::Block(BlockFailure::Other) => "BLOCK_ERROR",
            ErrorKind::Book(BookFailure::AmbiguousBooking) => "AMBIGUOUS_BOOKING",
            ErrorKind::Book(BookFailure::Rejected) => "REJECTED",
            ErrorKind::Book(BookFailure::ValidationFailed) => "VALIDATION_FAILED",
            ErrorKind::Book(BookFailure::Other) => "BOOK_ERROR",
            ErrorKind::SupplierUnavailable => "SUPPLIER_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::InvalidIdentifier => "INVALID_IDENTIFIER",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The single user-visible failure shape: `{stage, kind, message}`.
#[derive(Debug, Clone, Error)]
#[error("{stage}/{kind}: {message}")]
pub struct FlowError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl FlowError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(stage: Stage, supplier: &str) -> Self {
        Self::new(
            stage,
            ErrorKind::SupplierUnavailable,
            format!("circuit open for supplier {supplier}"),
        )
    }

    pub fn invalid_identifier(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::InvalidIdentifier, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// What went wrong with a single mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Malformed(String),
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => f.write_str("missing"),
            FieldProblem::Malformed(detail) => write!(f, "malformed: {detail}"),
        }
    }
}

/// One entry of the mapper's structural validation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub room_index: usize,
    pub field: String,
    pub problem: FieldProblem,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room {}: {} {}", self.room_index, self.field, self.problem)
    }
}

/// Render a validation report as a single message for FlowError.
pub fn issues_summary(issues: &[FieldIssue]) -> String {
    let parts: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
    parts.join("; ")
}
