// Domain data model shared by every stage of the booking flow.
//
// The chain SearchContext -> HotelCandidate -> RoomOffer -> BookingHold ->
// BookingConfirmation is strictly linear: each value carries the supplier it
// belongs to, and downstream code validates that binding instead of trusting
// whatever identifiers it is handed.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of an upstream supplier (e.g. "tbo", "availrs").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(String);

impl SupplierId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SupplierId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Supplier-issued correlation id binding together all calls of one
/// search-to-booking flow. Valid only for the supplier that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceId {
    pub supplier_id: SupplierId,
    pub value: String,
}

impl TraceId {
    pub fn new(supplier_id: SupplierId, value: impl Into<String>) -> Self {
        Self {
            supplier_id,
            value: value.into(),
        }
    }

    pub fn belongs_to(&self, supplier: &SupplierId) -> bool {
        &self.supplier_id == supplier
    }
}

/// A normalized price with the supplier's raw monetary sub-fields preserved.
/// `extra` keeps whatever the supplier returned (published/offered price,
/// taxes, breakdowns) so nothing is lost between the read and write schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Price {
    pub currency: String,
    pub amount: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Price {
    pub fn new(currency: impl Into<String>, amount: f64) -> Self {
        Self {
            currency: currency.into(),
            amount,
            extra: Map::new(),
        }
    }
}

/// Short-lived auth state for one supplier, owned by a single flow.
/// Tokens are treated as expiring (typically within 24h); flows always
/// re-authenticate rather than caching across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierSession {
    pub supplier_id: SupplierId,
    pub auth_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SupplierSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Token prefix safe for logs; full tokens never reach the log stream.
    pub fn token_preview(&self) -> String {
        let token = &self.auth_token;
        if token.len() <= 12 {
            "***".to_string()
        } else {
            format!("{}...", &token[..12])
        }
    }
}

/// Occupancy of a single requested room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOccupancy {
    pub adults: u8,
    pub children: u8,
    #[serde(default)]
    pub child_ages: Vec<u8>,
}

impl RoomOccupancy {
    pub fn adults(adults: u8) -> Self {
        Self {
            adults,
            children: 0,
            child_ages: Vec::new(),
        }
    }
}

/// Caller-supplied search input, supplier-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub destination: String,
    pub city_id: u32,
    pub country_code: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: Vec<RoomOccupancy>,
    pub currency: String,
    pub guest_nationality: String,
}

impl SearchCriteria {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

/// Created by a successful search; threads the supplier-issued trace id into
/// every subsequent step of the same flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchContext {
    pub trace_id: TraceId,
    pub supplier_id: SupplierId,
    pub city_id: u32,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: Vec<RoomOccupancy>,
    pub currency: String,
    pub guest_nationality: String,
}

/// One hotel in a supplier's search response. `result_index` is an ordinal
/// into that supplier's result set for this trace id; it is not a stable
/// hotel identifier and is meaningless outside the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotelCandidate {
    pub result_index: i64,
    pub hotel_code: String,
    pub hotel_name: String,
    pub star_rating: u8,
    pub price: Price,
    pub supplier_id: SupplierId,
}

/// A room offer exactly as the supplier's room-details call returned it.
/// `raw` is the supplier-native JSON object; the room mapper consumes it to
/// build the write-side payload, since suppliers are not consistent between
/// their read and write schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOffer {
    pub room_type_code: String,
    pub room_type_name: String,
    pub rate_plan_code: Option<String>,
    pub price: Price,
    pub raw: Map<String, Value>,
}

/// Temporary price/availability lock from a block-room call. Consumed by
/// Book or expires unused; never renewable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingHold {
    pub booking_id: Option<String>,
    pub blocked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub price_changed: bool,
    pub policy_changed: bool,
    pub confirmed_rooms: Vec<Value>,
}

impl BookingHold {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Terminal artifact of a successful flow. Immutable once created; a later
/// voucher failure does not un-confirm the booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub confirmation_number: String,
    pub booking_id: Option<String>,
    pub booking_reference: Option<String>,
    pub status: String,
    pub invoice_number: Option<String>,
    pub voucher_url: Option<String>,
}

/// Voucher document reference returned by GenerateVoucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherInfo {
    pub voucher_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaxType {
    Adult,
    Child,
}

impl PaxType {
    /// Numeric code used by supplier booking payloads.
    pub fn code(&self) -> u8 {
        match self {
            PaxType::Adult => 1,
            PaxType::Child => 2,
        }
    }
}

/// Lead or accompanying guest for the booking call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub pax_type: PaxType,
    pub age: u8,
    pub nationality: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Guest {
    pub fn adult(title: &str, first_name: &str, last_name: &str, age: u8, nationality: &str) -> Self {
        Self {
            title: title.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            pax_type: PaxType::Adult,
            age,
            nationality: nationality.to_string(),
            email: None,
            phone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn trace_id_binding_is_per_supplier() {
        let tbo = SupplierId::new("tbo");
        let availrs = SupplierId::new("availrs");
        let trace = TraceId::new(tbo.clone(), "T-123");
        assert!(trace.belongs_to(&tbo));
        assert!(!trace.belongs_to(&availrs));
    }

    #[test]
    fn hold_expiry_is_inclusive_of_deadline() {
        let now = Utc::now();
        let hold = BookingHold {
            booking_id: None,
            blocked_at: now,
            expires_at: now + Duration::minutes(15),
            price_changed: false,
            policy_changed: false,
            confirmed_rooms: vec![],
        };
        assert!(!hold.is_expired(now));
        assert!(hold.is_expired(now + Duration::minutes(15)));
        assert!(hold.is_expired(now + Duration::minutes(16)));
    }

    #[test]
    fn session_token_preview_never_leaks_full_token() {
        let session = SupplierSession {
            supplier_id: SupplierId::new("tbo"),
            auth_token: "tok-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        };
        let preview = session.token_preview();
        assert!(preview.len() < session.auth_token.len());
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn nights_derived_from_date_pair() {
        let criteria = SearchCriteria {
            destination: "Dubai".into(),
            city_id: 130_443,
            country_code: "AE".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(2)],
            currency: "USD".into(),
            guest_nationality: "IN".into(),
        };
        assert_eq!(criteria.nights(), 3);
    }
}
