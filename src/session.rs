// Per-flow session and trace store.
//
// One FlowContext exists per orchestrator run. It holds the short-lived
// identifiers (auth token, trace id, result index, booking id) that thread a
// single search-to-booking flow together, and validates at every transition
// that the identifiers it is handed exist and belong to this supplier/flow.
// Skipping a step or mixing identifiers from a different chain fails
// validation instead of silently proceeding.

use chrono::Utc;
use rand::Rng;

use crate::error::{FlowError, Stage};
use crate::types::{
    BookingHold, HotelCandidate, RoomOffer, SearchContext, SupplierId, SupplierSession,
};

#[derive(Debug)]
pub struct FlowContext {
    supplier_id: SupplierId,
    flow_ref: String,
    session: Option<SupplierSession>,
    search: Option<SearchContext>,
    candidate: Option<HotelCandidate>,
    offers: Vec<RoomOffer>,
    hold: Option<BookingHold>,
}

impl FlowContext {
    pub fn new(supplier_id: SupplierId) -> Self {
        // Client reference number sent to the supplier on block/book; also
        // the handle an operator uses to reconcile ambiguous bookings.
        let flow_ref = format!(
            "HF-{}-{:04X}",
            Utc::now().timestamp_millis(),
            rand::thread_rng().gen::<u16>()
        );
        Self {
            supplier_id,
            flow_ref,
            session: None,
            search: None,
            candidate: None,
            offers: Vec::new(),
            hold: None,
        }
    }

    pub fn supplier_id(&self) -> &SupplierId {
        &self.supplier_id
    }

    pub fn flow_ref(&self) -> &str {
        &self.flow_ref
    }

    pub fn attach_session(&mut self, session: SupplierSession) -> Result<(), FlowError> {
        if session.supplier_id != self.supplier_id {
            return Err(FlowError::invalid_identifier(
                Stage::Authenticating,
                format!(
                    "session issued by {} attached to a {} flow",
                    session.supplier_id, self.supplier_id
                ),
            ));
        }
        if session.is_expired(Utc::now()) {
            return Err(FlowError::invalid_identifier(
                Stage::Authenticating,
                "session already expired at attach time",
            ));
        }
        self.session = Some(session);
        Ok(())
    }

    /// The live session, re-checked for expiry at every use.
    pub fn session(&self, stage: Stage) -> Result<&SupplierSession, FlowError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| FlowError::invalid_identifier(stage, "no session: flow skipped AUTHENTICATING"))?;
        if session.is_expired(Utc::now()) {
            return Err(FlowError::invalid_identifier(stage, "session expired mid-flow"));
        }
        Ok(session)
    }

    pub fn attach_search(&mut self, search: SearchContext) -> Result<(), FlowError> {
        if self.session.is_none() {
            return Err(FlowError::invalid_identifier(
                Stage::Searching,
                "search attached before authentication",
            ));
        }
        if !search.trace_id.belongs_to(&self.supplier_id) {
            return Err(FlowError::invalid_identifier(
                Stage::Searching,
                format!(
                    "trace id from {} presented to a {} flow",
                    search.trace_id.supplier_id, self.supplier_id
                ),
            ));
        }
        self.search = Some(search);
        Ok(())
    }

    pub fn search(&self, stage: Stage) -> Result<&SearchContext, FlowError> {
        self.search
            .as_ref()
            .ok_or_else(|| FlowError::invalid_identifier(stage, "no search context: flow skipped SEARCHING"))
    }

    pub fn select_candidate(&mut self, candidate: HotelCandidate) -> Result<(), FlowError> {
        let search = self.search(Stage::RoomLookup)?;
        if candidate.supplier_id != search.supplier_id {
            return Err(FlowError::invalid_identifier(
                Stage::RoomLookup,
                format!(
                    "candidate from {} selected in a {} flow",
                    candidate.supplier_id, search.supplier_id
                ),
            ));
        }
        self.candidate = Some(candidate);
        Ok(())
    }

    pub fn candidate(&self, stage: Stage) -> Result<&HotelCandidate, FlowError> {
        self.candidate
            .as_ref()
            .ok_or_else(|| FlowError::invalid_identifier(stage, "no candidate selected"))
    }

    pub fn attach_offers(&mut self, offers: Vec<RoomOffer>) -> Result<(), FlowError> {
        self.candidate(Stage::RoomLookup)?;
        if offers.is_empty() {
            return Err(FlowError::new(
                Stage::RoomLookup,
                crate::error::ErrorKind::Room,
                "supplier returned no room offers",
            ));
        }
        self.offers = offers;
        Ok(())
    }

    pub fn offers(&self, stage: Stage) -> Result<&[RoomOffer], FlowError> {
        if self.offers.is_empty() {
            return Err(FlowError::invalid_identifier(stage, "no room offers: flow skipped ROOM_LOOKUP"));
        }
        Ok(&self.offers)
    }

    pub fn attach_hold(&mut self, hold: BookingHold) -> Result<(), FlowError> {
        self.offers(Stage::Blocking)?;
        self.hold = Some(hold);
        Ok(())
    }

    pub fn hold(&self, stage: Stage) -> Result<&BookingHold, FlowError> {
        self.hold
            .as_ref()
            .ok_or_else(|| FlowError::invalid_identifier(stage, "no hold: flow skipped BLOCKING"))
    }
}
