// Supplier client contract: one implementation per upstream hotel API.
//
// Each call is a single outbound HTTP request bounded by a supplier-specific
// timeout. No retries live here; retry and idempotency policy belongs to the
// orchestrator. Clients must reject identifiers issued by another supplier.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ErrorKind, FlowError, Stage};
use crate::mapper::MappedRoom;
use crate::types::{
    BookingConfirmation, BookingHold, Guest, HotelCandidate, RoomOffer, SearchContext,
    SearchCriteria, SupplierId, SupplierSession, VoucherInfo,
};

#[async_trait]
pub trait SupplierClient: Send + Sync + 'static {
    fn id(&self) -> &SupplierId;

    /// Timeout for search and room-details calls; block/book timeouts are
    /// the client's own concern.
    fn search_timeout(&self) -> Duration;

    async fn authenticate(&self) -> Result<SupplierSession, FlowError>;

    async fn search(
        &self,
        session: &SupplierSession,
        criteria: &SearchCriteria,
    ) -> Result<(SearchContext, Vec<HotelCandidate>), FlowError>;

    async fn room_details(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
    ) -> Result<Vec<RoomOffer>, FlowError>;

    async fn block_room(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
        rooms: &[MappedRoom],
        flow_ref: &str,
    ) -> Result<BookingHold, FlowError>;

    async fn book(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
        hold: &BookingHold,
        rooms: &[MappedRoom],
        guests: &[Guest],
        flow_ref: &str,
    ) -> Result<BookingConfirmation, FlowError>;

    async fn generate_voucher(
        &self,
        session: &SupplierSession,
        confirmation: &BookingConfirmation,
    ) -> Result<VoucherInfo, FlowError>;
}

/// Normalize a reqwest failure. Timeouts keep their own kind because the
/// orchestrator treats a timed-out Book differently from a refused one.
pub(crate) fn transport_error(stage: Stage, err: &reqwest::Error) -> FlowError {
    if err.is_timeout() {
        FlowError::new(stage, ErrorKind::Timeout, "supplier call timed out")
    } else {
        FlowError::new(stage, ErrorKind::Network, err.to_string())
    }
}

// Scriptable in-memory supplier used across the crate's tests: serves a
// deterministic inventory and can be switched into specific failure modes.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    use crate::error::{BlockFailure, BookFailure, ErrorKind, Stage};
    use crate::types::{Price, TraceId};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockMode {
        Normal,
        /// Credentials rejected on authenticate.
        AuthReject,
        /// Every network call fails with a connection error.
        Outage,
        /// Search succeeds but returns zero hotels.
        NoHotels,
        /// Room offers come back without any plan-code spelling, so the
        /// mapper's validation must fail before block is attempted.
        OffersMissingPlanCode,
        /// Block reports no availability for the selected room.
        BlockNoAvailability,
        /// Block succeeds but with a changed price.
        PriceChangedOnBlock,
        /// Block returns a hold that has already lapsed.
        HoldExpiredOnBlock,
        /// Book times out after the request was submitted.
        BookTimeout,
        /// Supplier declines the booking.
        BookReject,
    }

    #[derive(Debug, Default)]
    pub struct CallCounters {
        pub authenticate: AtomicUsize,
        pub search: AtomicUsize,
        pub room_details: AtomicUsize,
        pub block: AtomicUsize,
        pub book: AtomicUsize,
        pub voucher: AtomicUsize,
    }

    impl CallCounters {
        pub fn total(&self) -> usize {
            self.authenticate.load(Ordering::SeqCst)
                + self.search.load(Ordering::SeqCst)
                + self.room_details.load(Ordering::SeqCst)
                + self.block.load(Ordering::SeqCst)
                + self.book.load(Ordering::SeqCst)
                + self.voucher.load(Ordering::SeqCst)
        }
    }

    pub struct MockSupplier {
        id: SupplierId,
        mode: Mutex<MockMode>,
        trace_seq: AtomicUsize,
        pub counters: CallCounters,
    }

    impl MockSupplier {
        pub fn new(id: impl Into<SupplierId>) -> Self {
            Self {
                id: id.into(),
                mode: Mutex::new(MockMode::Normal),
                trace_seq: AtomicUsize::new(0),
                counters: CallCounters::default(),
            }
        }

        pub fn set_mode(&self, mode: MockMode) {
            *self.mode.lock() = mode;
        }

        fn mode(&self) -> MockMode {
            *self.mode.lock()
        }

        fn outage_guard(&self, stage: Stage) -> Result<(), FlowError> {
            if self.mode() == MockMode::Outage {
                return Err(FlowError::new(
                    stage,
                    ErrorKind::Network,
                    "connection refused",
                ));
            }
            Ok(())
        }

        fn trace_guard(&self, stage: Stage, trace: &TraceId) -> Result<(), FlowError> {
            if !trace.belongs_to(&self.id) {
                return Err(FlowError::invalid_identifier(
                    stage,
                    format!(
                        "trace id issued by {} presented to supplier {}",
                        trace.supplier_id, self.id
                    ),
                ));
            }
            Ok(())
        }

        fn offer(&self, ctx: &SearchContext, type_code: &str, amount: f64) -> RoomOffer {
            let mut raw = Map::new();
            raw.insert("RoomTypeCode".into(), json!(type_code));
            raw.insert("RoomTypeName".into(), json!(format!("{type_code} Room")));
            raw.insert("RatePlanCode".into(), json!(format!("RP-{type_code}")));
            raw.insert("CategoryId".into(), json!("CAT1"));
            raw.insert("SmokingPreference".into(), json!("NoPreference"));
            raw.insert(
                "Price".into(),
                json!({
                    "CurrencyCode": ctx.currency,
                    "OfferedPrice": amount,
                    "PublishedPrice": amount * 1.15,
                    "Tax": amount * 0.05
                }),
            );
            if self.mode() == MockMode::OffersMissingPlanCode {
                raw.remove("RatePlanCode");
            }
            RoomOffer {
                room_type_code: type_code.to_string(),
                room_type_name: format!("{type_code} Room"),
                rate_plan_code: raw
                    .get("RatePlanCode")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                price: Price::new(&ctx.currency, amount),
                raw,
            }
        }
    }

    #[async_trait]
    impl SupplierClient for MockSupplier {
        fn id(&self) -> &SupplierId {
            &self.id
        }

        fn search_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        async fn authenticate(&self) -> Result<SupplierSession, FlowError> {
            self.counters.authenticate.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::Authenticating)?;
            if self.mode() == MockMode::AuthReject {
                return Err(FlowError::new(
                    Stage::Authenticating,
                    ErrorKind::Auth,
                    "invalid credentials",
                ));
            }
            let now = Utc::now();
            Ok(SupplierSession {
                supplier_id: self.id.clone(),
                auth_token: format!("MOCKTOKEN-{}-{}", self.id, now.timestamp_millis()),
                issued_at: now,
                expires_at: now + ChronoDuration::hours(24),
            })
        }

        async fn search(
            &self,
            _session: &SupplierSession,
            criteria: &SearchCriteria,
        ) -> Result<(SearchContext, Vec<HotelCandidate>), FlowError> {
            self.counters.search.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::Searching)?;

            let seq = self.trace_seq.fetch_add(1, Ordering::SeqCst);
            let trace_id = TraceId::new(self.id.clone(), format!("MT-{}-{seq}", self.id));
            let ctx = SearchContext {
                trace_id,
                supplier_id: self.id.clone(),
                city_id: criteria.city_id,
                check_in: criteria.check_in,
                check_out: criteria.check_out,
                rooms: criteria.rooms.clone(),
                currency: criteria.currency.clone(),
                guest_nationality: criteria.guest_nationality.clone(),
            };

            if self.mode() == MockMode::NoHotels {
                return Ok((ctx, vec![]));
            }

            // Result indexes are supplier ordinals, deliberately not the
            // array positions.
            let candidates = vec![
                HotelCandidate {
                    result_index: 7,
                    hotel_code: "H-2001".into(),
                    hotel_name: format!("{} Plaza", criteria.destination),
                    star_rating: 4,
                    price: Price::new(&criteria.currency, 142.0),
                    supplier_id: self.id.clone(),
                },
                HotelCandidate {
                    result_index: 11,
                    hotel_code: "H-2002".into(),
                    hotel_name: format!("{} Bay Resort", criteria.destination),
                    star_rating: 5,
                    price: Price::new(&criteria.currency, 96.5),
                    supplier_id: self.id.clone(),
                },
                HotelCandidate {
                    result_index: 23,
                    hotel_code: "H-2003".into(),
                    hotel_name: format!("{} Suites", criteria.destination),
                    star_rating: 3,
                    price: Price::new(&criteria.currency, 188.0),
                    supplier_id: self.id.clone(),
                },
            ];
            Ok((ctx, candidates))
        }

        async fn room_details(
            &self,
            _session: &SupplierSession,
            ctx: &SearchContext,
            candidate: &HotelCandidate,
        ) -> Result<Vec<RoomOffer>, FlowError> {
            self.counters.room_details.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::RoomLookup)?;
            self.trace_guard(Stage::RoomLookup, &ctx.trace_id)?;
            Ok(vec![
                self.offer(ctx, "DLX", candidate.price.amount),
                self.offer(ctx, "STD", candidate.price.amount * 0.85),
            ])
        }

        async fn block_room(
            &self,
            _session: &SupplierSession,
            ctx: &SearchContext,
            _candidate: &HotelCandidate,
            _rooms: &[MappedRoom],
            flow_ref: &str,
        ) -> Result<BookingHold, FlowError> {
            self.counters.block.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::Blocking)?;
            self.trace_guard(Stage::Blocking, &ctx.trace_id)?;

            if self.mode() == MockMode::BlockNoAvailability {
                return Err(FlowError::new(
                    Stage::Blocking,
                    ErrorKind::Block(BlockFailure::NoAvailability),
                    "room no longer available",
                ));
            }

            let now = Utc::now();
            let expires_at = if self.mode() == MockMode::HoldExpiredOnBlock {
                now - ChronoDuration::minutes(1)
            } else {
                now + ChronoDuration::minutes(15)
            };
            Ok(BookingHold {
                booking_id: Some(format!("HOLD-{flow_ref}")),
                blocked_at: now,
                expires_at,
                price_changed: self.mode() == MockMode::PriceChangedOnBlock,
                policy_changed: false,
                confirmed_rooms: vec![],
            })
        }

        async fn book(
            &self,
            _session: &SupplierSession,
            ctx: &SearchContext,
            _candidate: &HotelCandidate,
            _hold: &BookingHold,
            _rooms: &[MappedRoom],
            guests: &[Guest],
            flow_ref: &str,
        ) -> Result<BookingConfirmation, FlowError> {
            self.counters.book.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::Booking)?;
            self.trace_guard(Stage::Booking, &ctx.trace_id)?;

            match self.mode() {
                // The request went out; the reply never came back.
                MockMode::BookTimeout => Err(FlowError::new(
                    Stage::Booking,
                    ErrorKind::Timeout,
                    "book call timed out after submission",
                )),
                MockMode::BookReject => Err(FlowError::new(
                    Stage::Booking,
                    ErrorKind::Book(BookFailure::Rejected),
                    "supplier declined the booking",
                )),
                _ => {
                    if guests.is_empty() {
                        return Err(FlowError::new(
                            Stage::Booking,
                            ErrorKind::Book(BookFailure::Other),
                            "no guests supplied",
                        ));
                    }
                    Ok(BookingConfirmation {
                        confirmation_number: format!("CONF-{}", flow_ref),
                        booking_id: Some(format!("BK-{}", ctx.trace_id.value)),
                        booking_reference: Some(format!("REF-{}", flow_ref)),
                        status: "Confirmed".into(),
                        invoice_number: Some(format!("INV-{}", flow_ref)),
                        voucher_url: None,
                    })
                }
            }
        }

        async fn generate_voucher(
            &self,
            _session: &SupplierSession,
            confirmation: &BookingConfirmation,
        ) -> Result<VoucherInfo, FlowError> {
            self.counters.voucher.fetch_add(1, Ordering::SeqCst);
            self.outage_guard(Stage::Voucher)?;
            Ok(VoucherInfo {
                voucher_url: format!(
                    "https://vouchers.example.com/{}/{}.pdf",
                    self.id, confirmation.confirmation_number
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockMode, MockSupplier};
    use super::*;
    use crate::error::{ErrorKind, Stage};
    use crate::types::{RoomOccupancy, TraceId};
    use chrono::NaiveDate;

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            destination: "Dubai".into(),
            city_id: 130_443,
            country_code: "AE".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(2)],
            currency: "USD".into(),
            guest_nationality: "IN".into(),
        }
    }

    #[tokio::test]
    async fn mock_search_issues_supplier_bound_trace() {
        let supplier = MockSupplier::new("tbo");
        let session = supplier.authenticate().await.unwrap();
        let (ctx, candidates) = supplier.search(&session, &criteria()).await.unwrap();
        assert!(ctx.trace_id.belongs_to(supplier.id()));
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.price.amount > 0.0));
    }

    #[tokio::test]
    async fn foreign_trace_is_rejected_by_room_details() {
        let supplier = MockSupplier::new("tbo");
        let session = supplier.authenticate().await.unwrap();
        let (mut ctx, candidates) = supplier.search(&session, &criteria()).await.unwrap();
        ctx.trace_id = TraceId::new("availrs".into(), "FOREIGN-1");
        let err = supplier
            .room_details(&session, &ctx, &candidates[0])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIdentifier);
        assert_eq!(err.stage, Stage::RoomLookup);
    }

    #[tokio::test]
    async fn auth_reject_mode_fails_authentication() {
        let supplier = MockSupplier::new("tbo");
        supplier.set_mode(MockMode::AuthReject);
        let err = supplier.authenticate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }
}
