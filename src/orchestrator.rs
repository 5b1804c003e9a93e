// Booking orchestrator: drives one flow through
// AUTHENTICATING -> SEARCHING -> ROOM_LOOKUP -> BLOCKING -> BOOKING ->
// CONFIRMED against a single supplier, with every network call gated by
// that supplier's circuit breaker.
//
// Two rules are absolute here: the booking payload is validated before any
// block/book traffic leaves the process, and a timed-out Book is never
// reissued, it surfaces as an ambiguous booking carrying the flow reference
// for out-of-band reconciliation.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::breaker::{Acquire, BreakerRegistry};
use crate::error::{
    issues_summary, BlockFailure, BookFailure, ErrorKind, FlowError, Stage,
};
use crate::mapper;
use crate::session::FlowContext;
use crate::supplier::SupplierClient;
use crate::types::{
    BookingConfirmation, Guest, HotelCandidate, RoomOffer, SearchCriteria, SupplierId,
};

/// One caller-facing booking order.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub criteria: SearchCriteria,
    pub guests: Vec<Guest>,
    /// Whether to generate the voucher document right after confirmation.
    pub voucher_booking: bool,
}

/// Terminal result of a successful flow.
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub supplier_id: SupplierId,
    pub flow_ref: String,
    pub hotel: HotelCandidate,
    pub confirmation: BookingConfirmation,
}

pub struct Orchestrator {
    supplier: Arc<dyn SupplierClient>,
    breakers: Arc<BreakerRegistry>,
}

impl Orchestrator {
    pub fn new(supplier: Arc<dyn SupplierClient>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { supplier, breakers }
    }

    pub fn supplier_id(&self) -> &SupplierId {
        self.supplier.id()
    }

    pub fn search_timeout(&self) -> std::time::Duration {
        self.supplier.search_timeout()
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Run one supplier call under the circuit breaker. Business rejections
    /// (price changed, booking declined) leave the breaker alone; only
    /// transport-level failures count towards tripping it.
    async fn guarded<T, F>(&self, stage: Stage, call: F) -> Result<T, FlowError>
    where
        F: Future<Output = Result<T, FlowError>>,
    {
        let supplier = self.supplier.id().clone();
        match self.breakers.try_acquire(&supplier) {
            Acquire::Permit => {}
            Acquire::Rejected { retry_in } => {
                warn!(
                    supplier = %supplier,
                    stage = stage.name(),
                    retry_in_ms = retry_in.as_millis() as u64,
                    "circuit open, call skipped"
                );
                return Err(FlowError::unavailable(stage, supplier.as_str()));
            }
        }

        let started = Instant::now();
        let result = call.await;
        match &result {
            Ok(_) => self.breakers.record(&supplier, true, started.elapsed()),
            Err(e) if matches!(e.kind, ErrorKind::Network | ErrorKind::Timeout) => {
                self.breakers.record(&supplier, false, started.elapsed())
            }
            // A business rejection says nothing about transport health;
            // it neither trips the breaker nor counts as a success.
            Err(_) => {}
        }
        result
    }

    /// Authenticate and search only; used by the multi-supplier aggregator.
    /// An empty result set is not a failure here.
    pub async fn search_once(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<HotelCandidate>, FlowError> {
        let session = self
            .guarded(Stage::Authenticating, self.supplier.authenticate())
            .await?;
        let (_ctx, candidates) = self
            .guarded(Stage::Searching, self.supplier.search(&session, criteria))
            .await?;
        Ok(candidates)
    }

    /// Drive a full flow to a confirmed booking on this supplier.
    pub async fn run(&self, request: &BookingRequest) -> Result<BookingOutcome, FlowError> {
        let mut flow = FlowContext::new(self.supplier.id().clone());
        info!(
            supplier = %flow.supplier_id(),
            flow_ref = flow.flow_ref(),
            stage = Stage::Authenticating.name(),
            "flow started"
        );

        let session = self
            .guarded(Stage::Authenticating, self.supplier.authenticate())
            .await?;
        flow.attach_session(session)?;

        let session = flow.session(Stage::Searching)?.clone();
        let (ctx, candidates) = self
            .guarded(
                Stage::Searching,
                self.supplier.search(&session, &request.criteria),
            )
            .await?;
        flow.attach_search(ctx)?;
        let cheapest = candidates
            .into_iter()
            .min_by(|a, b| a.price.amount.total_cmp(&b.price.amount))
            .ok_or_else(|| {
                FlowError::new(
                    Stage::Searching,
                    ErrorKind::Search,
                    "no hotels available for the requested stay",
                )
            })?;
        info!(
            supplier = %flow.supplier_id(),
            hotel = %cheapest.hotel_name,
            price = cheapest.price.amount,
            stage = Stage::RoomLookup.name(),
            "candidate selected"
        );
        flow.select_candidate(cheapest)?;

        let ctx = flow.search(Stage::RoomLookup)?.clone();
        let candidate = flow.candidate(Stage::RoomLookup)?.clone();
        let offers = self
            .guarded(
                Stage::RoomLookup,
                self.supplier.room_details(&session, &ctx, &candidate),
            )
            .await?;
        flow.attach_offers(offers)?;

        // One payload room per requested occupancy, offers reused in order.
        let offers = flow.offers(Stage::Blocking)?;
        let per_room: Vec<RoomOffer> = request
            .criteria
            .rooms
            .iter()
            .enumerate()
            .map(|(i, _)| offers[i % offers.len()].clone())
            .collect();
        let mapped = mapper::map_for_booking(&per_room, &request.criteria.currency);
        let issues = mapper::validate_booking_rooms(&mapped);
        if !issues.is_empty() {
            warn!(
                supplier = %flow.supplier_id(),
                issues = %issues_summary(&issues),
                "booking payload failed validation, supplier not contacted"
            );
            return Err(FlowError::new(
                Stage::Blocking,
                ErrorKind::Book(BookFailure::ValidationFailed),
                issues_summary(&issues),
            ));
        }

        let hold = self
            .guarded(
                Stage::Blocking,
                self.supplier
                    .block_room(&session, &ctx, &candidate, &mapped, flow.flow_ref()),
            )
            .await?;
        if hold.price_changed || hold.policy_changed {
            return Err(FlowError::new(
                Stage::Blocking,
                ErrorKind::Block(BlockFailure::PriceChanged),
                "price or cancellation policy changed at block, re-quote required",
            ));
        }
        flow.attach_hold(hold)?;

        let hold = flow.hold(Stage::Booking)?.clone();
        if hold.is_expired(Utc::now()) {
            return Err(FlowError::new(
                Stage::Booking,
                ErrorKind::Block(BlockFailure::HoldExpired),
                "hold expired before book, restart from search",
            ));
        }

        let flow_ref = flow.flow_ref().to_string();
        let book_result = self
            .guarded(
                Stage::Booking,
                self.supplier.book(
                    &session,
                    &ctx,
                    &candidate,
                    &hold,
                    &mapped,
                    &request.guests,
                    &flow_ref,
                ),
            )
            .await;
        let mut confirmation = match book_result {
            Ok(confirmation) => confirmation,
            // The supplier may have committed the reservation before the
            // timeout fired. Reissuing Book could double-charge, so the
            // flow ends here with the reference an operator needs.
            Err(e) if e.is_timeout() => {
                return Err(FlowError::new(
                    Stage::Booking,
                    ErrorKind::Book(BookFailure::AmbiguousBooking),
                    format!("book call timed out after submission, reconcile with reference {flow_ref}"),
                ));
            }
            Err(e) => return Err(e),
        };

        if request.voucher_booking {
            match self
                .guarded(
                    Stage::Voucher,
                    self.supplier.generate_voucher(&session, &confirmation),
                )
                .await
            {
                Ok(voucher) => confirmation.voucher_url = Some(voucher.voucher_url),
                // The booking is already confirmed; a voucher failure must
                // not unwind it.
                Err(e) => warn!(
                    supplier = %flow.supplier_id(),
                    error = %e,
                    "voucher generation failed, booking remains confirmed"
                ),
            }
        }

        info!(
            supplier = %flow.supplier_id(),
            flow_ref = %flow_ref,
            confirmation = %confirmation.confirmation_number,
            stage = Stage::Confirmed.name(),
            "flow confirmed"
        );
        Ok(BookingOutcome {
            supplier_id: self.supplier.id().clone(),
            flow_ref,
            hotel: candidate,
            confirmation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::config::BreakerConfig;
    use crate::supplier::mock::{MockMode, MockSupplier};
    use crate::types::RoomOccupancy;
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    fn dubai_request() -> BookingRequest {
        BookingRequest {
            criteria: SearchCriteria {
                destination: "Dubai".into(),
                city_id: 130_443,
                country_code: "AE".into(),
                check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
                check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
                rooms: vec![RoomOccupancy::adults(2)],
                currency: "USD".into(),
                guest_nationality: "IN".into(),
            },
            guests: vec![Guest::adult("Mr", "Asha", "Rao", 34, "IN")],
            voucher_booking: true,
        }
    }

    fn engine(mode: MockMode) -> (Arc<MockSupplier>, Orchestrator) {
        let supplier = Arc::new(MockSupplier::new("tbo"));
        supplier.set_mode(mode);
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let orchestrator = Orchestrator::new(supplier.clone(), breakers);
        (supplier, orchestrator)
    }

    #[tokio::test]
    async fn happy_path_books_cheapest_hotel_with_voucher() {
        let (supplier, orchestrator) = engine(MockMode::Normal);
        let outcome = orchestrator.run(&dubai_request()).await.unwrap();

        assert_eq!(outcome.hotel.hotel_code, "H-2002");
        assert_eq!(outcome.hotel.price.amount, 96.5);
        assert!(outcome.hotel.hotel_name.contains("Dubai"));
        assert_eq!(outcome.confirmation.status, "Confirmed");
        assert!(outcome.confirmation.voucher_url.is_some());
        assert!(outcome.flow_ref.starts_with("HF-"));

        assert_eq!(supplier.counters.authenticate.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.counters.search.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.counters.room_details.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.counters.block.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.counters.book.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.counters.voucher.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn book_timeout_is_ambiguous_and_never_retried() {
        let (supplier, orchestrator) = engine(MockMode::BookTimeout);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Booking);
        assert_eq!(err.kind, ErrorKind::Book(BookFailure::AmbiguousBooking));
        assert!(err.message.contains("HF-"));
        // Exactly one Book went out; no retry after the timeout.
        assert_eq!(supplier.counters.book.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_hold_fails_before_book_is_sent() {
        let (supplier, orchestrator) = engine(MockMode::HoldExpiredOnBlock);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Block(BlockFailure::HoldExpired));
        assert_eq!(supplier.counters.book.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn price_change_at_block_aborts_the_flow() {
        let (supplier, orchestrator) = engine(MockMode::PriceChangedOnBlock);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Blocking);
        assert_eq!(err.kind, ErrorKind::Block(BlockFailure::PriceChanged));
        assert_eq!(supplier.counters.book.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_failure_skips_the_network_entirely() {
        let (supplier, orchestrator) = engine(MockMode::OffersMissingPlanCode);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Blocking);
        assert_eq!(err.kind, ErrorKind::Book(BookFailure::ValidationFailed));
        assert!(err.message.contains("RatePlanCode"));
        assert_eq!(supplier.counters.block.load(Ordering::SeqCst), 0);
        assert_eq!(supplier.counters.book.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_hotels_is_a_search_error() {
        let (_, orchestrator) = engine(MockMode::NoHotels);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Searching);
        assert_eq!(err.kind, ErrorKind::Search);
    }

    #[tokio::test]
    async fn auth_rejection_stops_before_search() {
        let (supplier, orchestrator) = engine(MockMode::AuthReject);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Authenticating);
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(supplier.counters.search.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_calling_the_supplier() {
        let (supplier, orchestrator) = engine(MockMode::Normal);
        let id = supplier.id().clone();
        for _ in 0..5 {
            orchestrator
                .breakers()
                .record(&id, false, std::time::Duration::from_millis(10));
        }

        let err = orchestrator.run(&dubai_request()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Authenticating);
        assert_eq!(err.kind, ErrorKind::SupplierUnavailable);
        assert_eq!(supplier.counters.total(), 0);
    }

    #[tokio::test]
    async fn repeated_outages_trip_the_breaker() {
        let (supplier, orchestrator) = engine(MockMode::Outage);
        for _ in 0..5 {
            let err = orchestrator.run(&dubai_request()).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Network);
        }
        assert_eq!(supplier.counters.authenticate.load(Ordering::SeqCst), 5);

        // Sixth attempt is rejected by the breaker, not by the supplier.
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SupplierUnavailable);
        assert_eq!(supplier.counters.authenticate.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn business_rejections_do_not_trip_the_breaker() {
        let (supplier, orchestrator) = engine(MockMode::BlockNoAvailability);
        for _ in 0..6 {
            let err = orchestrator.run(&dubai_request()).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Block(BlockFailure::NoAvailability));
        }
        let snap = orchestrator.breakers().snapshot(supplier.id());
        assert_eq!(snap.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn business_failures_leave_no_health_record() {
        let (supplier, orchestrator) = engine(MockMode::AuthReject);
        let err = orchestrator.run(&dubai_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);

        // The rejected auth is neither a failure nor a success in the
        // breaker's window.
        let snap = orchestrator.breakers().snapshot(supplier.id());
        assert_eq!(snap.recent_calls, 0);
        assert_eq!(snap.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn voucher_flag_controls_generation() {
        let (supplier, orchestrator) = engine(MockMode::Normal);
        let mut request = dubai_request();
        request.voucher_booking = false;
        let outcome = orchestrator.run(&request).await.unwrap();
        assert!(outcome.confirmation.voucher_url.is_none());
        assert_eq!(supplier.counters.voucher.load(Ordering::SeqCst), 0);
    }
}
