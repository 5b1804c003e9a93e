// JSON supplier client for the token/trace wire contract (TBO-style).
//
// The supplier splits one booking into six POST calls: Authenticate issues a
// TokenId, GetHotelResult issues a TraceId that every later call must echo,
// then GetHotelRoom, BlockRoom, Book and GenerateVoucher. Business failures
// arrive as `ResponseStatus != 1` with a numeric error code; transport and
// business failures are both normalized to FlowError here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::SupplierConfig;
use crate::error::{BlockFailure, BookFailure, ErrorKind, FlowError, Stage};
use crate::mapper::{self, MappedRoom};
use crate::proxy::ProxyConfig;
use crate::supplier::{transport_error, SupplierClient};
use crate::types::{
    BookingConfirmation, BookingHold, Guest, HotelCandidate, Price, RoomOffer, SearchContext,
    SearchCriteria, SupplierId, SupplierSession, TraceId, VoucherInfo,
};

/// Wire date format: dd/MM/yyyy.
const DATE_FMT: &str = "%d/%m/%Y";

/// Tokens are valid for 24 hours from issue.
const TOKEN_TTL_HOURS: i64 = 24;

/// A price hold is honored for 15 minutes after BlockRoom.
const HOLD_TTL_MINUTES: i64 = 15;

pub struct TboClient {
    config: SupplierConfig,
    http: reqwest::Client,
}

impl TboClient {
    pub fn new(config: SupplierConfig, proxy: Option<&ProxyConfig>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = proxy {
            builder = proxy.apply(builder)?;
        }
        Ok(Self {
            config,
            http: builder.build()?,
        })
    }

    async fn post_json<B, R>(
        &self,
        stage: Stage,
        url: &str,
        timeout: Duration,
        body: &B,
    ) -> Result<R, FlowError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(supplier = %self.config.id, stage = stage.name(), url, "outbound call");
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(stage, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::new(
                stage,
                ErrorKind::Network,
                format!("{url} returned HTTP {status}"),
            ));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| transport_error(stage, &e))
    }

    fn trace_guard(&self, stage: Stage, trace: &TraceId) -> Result<(), FlowError> {
        if !trace.belongs_to(&self.config.id) {
            return Err(FlowError::invalid_identifier(
                stage,
                format!(
                    "trace id issued by {} presented to supplier {}",
                    trace.supplier_id, self.config.id
                ),
            ));
        }
        Ok(())
    }
}

// --- wire shapes -----------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthRequest<'a> {
    client_id: &'a str,
    user_name: &'a str,
    password: &'a str,
    end_user_ip: &'a str,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct WireError {
    error_code: i64,
    error_message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct AuthResponse {
    status: i64,
    token_id: Option<String>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchEnvelope {
    hotel_search_result: SearchResult,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct SearchResult {
    response_status: i64,
    error: Option<WireError>,
    trace_id: Option<String>,
    hotel_results: Vec<WireHotel>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct WireHotel {
    result_index: i64,
    hotel_code: String,
    hotel_name: String,
    star_rating: u8,
    price: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoomEnvelope {
    get_hotel_room_result: RoomResult,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RoomResult {
    response_status: i64,
    error: Option<WireError>,
    hotel_rooms_details: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockEnvelope {
    block_room_result: BlockResult,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct BlockResult {
    response_status: i64,
    error: Option<WireError>,
    is_price_changed: bool,
    is_cancellation_policy_changed: bool,
    hotel_rooms_details: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BookEnvelope {
    book_result: BookResult,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct BookResult {
    response_status: i64,
    error: Option<WireError>,
    status: i64,
    booking_id: Option<Value>,
    booking_ref_no: Option<String>,
    confirmation_no: Option<String>,
    invoice_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VoucherEnvelope {
    generate_voucher_result: VoucherResult,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct VoucherResult {
    response_status: i64,
    error: Option<WireError>,
    #[serde(alias = "VoucherURL")]
    voucher_url: Option<String>,
}

// --- error normalization ---------------------------------------------------

/// Map the supplier's numeric error codes onto the crate's failure taxonomy.
/// Unknown codes fall back to the generic kind for the failing stage.
fn kind_for_code(stage: Stage, code: i64) -> ErrorKind {
    match code {
        5001 => ErrorKind::Auth,
        5002 | 5003 => match stage {
            Stage::Searching | Stage::RoomLookup => ErrorKind::Search,
            _ => ErrorKind::Block(BlockFailure::NoAvailability),
        },
        5004 => ErrorKind::Book(BookFailure::Rejected),
        5005 | 5006 => ErrorKind::Book(BookFailure::ValidationFailed),
        5007 | 5008 => ErrorKind::Block(BlockFailure::PriceChanged),
        _ => match stage {
            Stage::Authenticating => ErrorKind::Auth,
            Stage::Searching => ErrorKind::Search,
            Stage::RoomLookup => ErrorKind::Room,
            Stage::Blocking => ErrorKind::Block(BlockFailure::Other),
            Stage::Booking | Stage::Voucher | Stage::Confirmed => {
                ErrorKind::Book(BookFailure::Other)
            }
        },
    }
}

fn ensure_ok(stage: Stage, response_status: i64, error: Option<WireError>) -> Result<(), FlowError> {
    if response_status == 1 {
        return Ok(());
    }
    let (code, message) = error
        .map(|e| (e.error_code, e.error_message))
        .unwrap_or_default();
    let message = if message.is_empty() {
        format!("supplier returned response status {response_status}")
    } else {
        message
    };
    Err(FlowError::new(stage, kind_for_code(stage, code), message))
}

// --- payload builders ------------------------------------------------------

fn room_guests(criteria: &SearchCriteria) -> Vec<Value> {
    criteria
        .rooms
        .iter()
        .map(|room| {
            json!({
                "NoOfAdults": room.adults,
                "NoOfChild": room.children,
                "ChildAge": room.child_ages,
            })
        })
        .collect()
}

fn passengers(guests: &[Guest]) -> Vec<Value> {
    guests
        .iter()
        .enumerate()
        .map(|(i, guest)| {
            json!({
                "Title": guest.title,
                "FirstName": guest.first_name,
                "LastName": guest.last_name,
                "PaxType": guest.pax_type.code(),
                "LeadPassenger": i == 0,
                "Age": guest.age,
                "Nationality": guest.nationality,
                "Email": guest.email,
                "Phoneno": guest.phone,
            })
        })
        .collect()
}

fn offer_from_raw(raw: Value, fallback_currency: &str) -> Option<RoomOffer> {
    let raw = match raw {
        Value::Object(map) => map,
        _ => return None,
    };
    let price = mapper::first_non_empty(&raw, mapper::PRICE_FIELDS)
        .map(|p| mapper::price_from_value(p, fallback_currency))
        .unwrap_or_else(|| Price::new(fallback_currency, 0.0));
    Some(RoomOffer {
        room_type_code: mapper::first_non_empty(&raw, mapper::ROOM_TYPE_CODE_FIELDS)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        room_type_name: mapper::first_non_empty(&raw, mapper::ROOM_TYPE_NAME_FIELDS)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        rate_plan_code: mapper::first_non_empty(&raw, mapper::RATE_PLAN_CODE_FIELDS)
            .and_then(Value::as_str)
            .map(str::to_string),
        price,
        raw,
    })
}

fn booking_id_string(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------

#[async_trait]
impl SupplierClient for TboClient {
    fn id(&self) -> &SupplierId {
        &self.config.id
    }

    fn search_timeout(&self) -> Duration {
        self.config.search_timeout
    }

    async fn authenticate(&self) -> Result<SupplierSession, FlowError> {
        let stage = Stage::Authenticating;
        let creds = &self.config.credentials;
        let request = AuthRequest {
            client_id: &creds.client_id,
            user_name: &creds.user_name,
            password: &creds.password,
            end_user_ip: &creds.end_user_ip,
        };
        let response: AuthResponse = self
            .post_json(stage, &self.config.endpoints.auth_url, self.config.search_timeout, &request)
            .await?;

        ensure_ok(stage, response.status, response.error)?;
        let token = response.token_id.filter(|t| !t.is_empty()).ok_or_else(|| {
            FlowError::new(stage, ErrorKind::Auth, "auth response carried no token")
        })?;

        let now = Utc::now();
        let session = SupplierSession {
            supplier_id: self.config.id.clone(),
            auth_token: token,
            issued_at: now,
            expires_at: now + ChronoDuration::hours(TOKEN_TTL_HOURS),
        };
        info!(supplier = %self.config.id, token = %session.token_preview(), "authenticated");
        Ok(session)
    }

    async fn search(
        &self,
        session: &SupplierSession,
        criteria: &SearchCriteria,
    ) -> Result<(SearchContext, Vec<HotelCandidate>), FlowError> {
        let stage = Stage::Searching;
        let request = json!({
            "CheckInDate": criteria.check_in.format(DATE_FMT).to_string(),
            "NoOfNights": criteria.nights(),
            "CountryCode": criteria.country_code,
            "CityId": criteria.city_id,
            "PreferredCurrency": criteria.currency,
            "GuestNationality": criteria.guest_nationality,
            "NoOfRooms": criteria.rooms.len(),
            "RoomGuests": room_guests(criteria),
            "TokenId": session.auth_token,
            "EndUserIp": self.config.credentials.end_user_ip,
        });
        let envelope: SearchEnvelope = self
            .post_json(stage, &self.config.endpoints.search_url, self.config.search_timeout, &request)
            .await?;
        let result = envelope.hotel_search_result;
        ensure_ok(stage, result.response_status, result.error)?;

        let trace = result.trace_id.filter(|t| !t.is_empty()).ok_or_else(|| {
            FlowError::new(stage, ErrorKind::Search, "search response carried no trace id")
        })?;
        let ctx = SearchContext {
            trace_id: TraceId::new(self.config.id.clone(), trace),
            supplier_id: self.config.id.clone(),
            city_id: criteria.city_id,
            check_in: criteria.check_in,
            check_out: criteria.check_out,
            rooms: criteria.rooms.clone(),
            currency: criteria.currency.clone(),
            guest_nationality: criteria.guest_nationality.clone(),
        };
        let candidates: Vec<HotelCandidate> = result
            .hotel_results
            .into_iter()
            .map(|hotel| HotelCandidate {
                result_index: hotel.result_index,
                hotel_code: hotel.hotel_code,
                hotel_name: hotel.hotel_name,
                star_rating: hotel.star_rating,
                price: hotel
                    .price
                    .as_ref()
                    .map(|p| mapper::price_from_value(p, &criteria.currency))
                    .unwrap_or_else(|| Price::new(&criteria.currency, 0.0)),
                supplier_id: self.config.id.clone(),
            })
            .collect();
        info!(
            supplier = %self.config.id,
            trace = %ctx.trace_id.value,
            hotels = candidates.len(),
            "search complete"
        );
        Ok((ctx, candidates))
    }

    async fn room_details(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
    ) -> Result<Vec<RoomOffer>, FlowError> {
        let stage = Stage::RoomLookup;
        self.trace_guard(stage, &ctx.trace_id)?;
        let request = json!({
            "ResultIndex": candidate.result_index,
            "HotelCode": candidate.hotel_code,
            "TraceId": ctx.trace_id.value,
            "TokenId": session.auth_token,
            "EndUserIp": self.config.credentials.end_user_ip,
        });
        let envelope: RoomEnvelope = self
            .post_json(stage, &self.config.endpoints.room_url, self.config.search_timeout, &request)
            .await?;
        let result = envelope.get_hotel_room_result;
        ensure_ok(stage, result.response_status, result.error)?;

        Ok(result
            .hotel_rooms_details
            .into_iter()
            .filter_map(|raw| offer_from_raw(raw, &ctx.currency))
            .collect())
    }

    async fn block_room(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
        rooms: &[MappedRoom],
        flow_ref: &str,
    ) -> Result<BookingHold, FlowError> {
        let stage = Stage::Blocking;
        self.trace_guard(stage, &ctx.trace_id)?;
        let request = json!({
            "ResultIndex": candidate.result_index,
            "HotelCode": candidate.hotel_code,
            "HotelName": candidate.hotel_name,
            "GuestNationality": ctx.guest_nationality,
            "NoOfRooms": rooms.len(),
            "ClientReferenceNo": flow_ref,
            "HotelRoomsDetails": rooms.iter().map(MappedRoom::to_value).collect::<Vec<_>>(),
            "TraceId": ctx.trace_id.value,
            "TokenId": session.auth_token,
            "EndUserIp": self.config.credentials.end_user_ip,
        });
        let envelope: BlockEnvelope = self
            .post_json(stage, &self.config.endpoints.block_url, self.config.book_timeout, &request)
            .await?;
        let result = envelope.block_room_result;
        ensure_ok(stage, result.response_status, result.error)?;

        let now = Utc::now();
        Ok(BookingHold {
            booking_id: None,
            blocked_at: now,
            expires_at: now + ChronoDuration::minutes(HOLD_TTL_MINUTES),
            price_changed: result.is_price_changed,
            policy_changed: result.is_cancellation_policy_changed,
            confirmed_rooms: result.hotel_rooms_details,
        })
    }

    async fn book(
        &self,
        session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
        _hold: &BookingHold,
        rooms: &[MappedRoom],
        guests: &[Guest],
        flow_ref: &str,
    ) -> Result<BookingConfirmation, FlowError> {
        let stage = Stage::Booking;
        self.trace_guard(stage, &ctx.trace_id)?;

        // The write schema nests the passenger list inside each room.
        let pax = passengers(guests);
        let rooms_payload: Vec<Value> = rooms
            .iter()
            .map(|room| {
                let mut payload = room.as_object().clone();
                payload.insert("HotelPassenger".into(), Value::Array(pax.clone()));
                Value::Object(payload)
            })
            .collect();

        let request = json!({
            "ResultIndex": candidate.result_index,
            "HotelCode": candidate.hotel_code,
            "HotelName": candidate.hotel_name,
            "GuestNationality": ctx.guest_nationality,
            "NoOfRooms": rooms.len(),
            "ClientReferenceNo": flow_ref,
            "IsVoucherBooking": true,
            "HotelRoomsDetails": rooms_payload,
            "TraceId": ctx.trace_id.value,
            "TokenId": session.auth_token,
            "EndUserIp": self.config.credentials.end_user_ip,
        });
        let envelope: BookEnvelope = self
            .post_json(stage, &self.config.endpoints.book_url, self.config.book_timeout, &request)
            .await?;
        let result = envelope.book_result;
        ensure_ok(stage, result.response_status, result.error)?;

        let confirmation_number = result
            .confirmation_no
            .filter(|c| !c.is_empty())
            .or_else(|| result.booking_ref_no.clone().filter(|r| !r.is_empty()))
            .ok_or_else(|| {
                FlowError::new(
                    stage,
                    ErrorKind::Book(BookFailure::Other),
                    "book response carried no confirmation number",
                )
            })?;

        let confirmation = BookingConfirmation {
            confirmation_number,
            booking_id: booking_id_string(result.booking_id),
            booking_reference: result.booking_ref_no,
            status: if result.status == 1 {
                "Confirmed".to_string()
            } else {
                format!("Status{}", result.status)
            },
            invoice_number: result.invoice_number,
            voucher_url: None,
        };
        info!(
            supplier = %self.config.id,
            confirmation = %confirmation.confirmation_number,
            "booking confirmed"
        );
        Ok(confirmation)
    }

    async fn generate_voucher(
        &self,
        session: &SupplierSession,
        confirmation: &BookingConfirmation,
    ) -> Result<VoucherInfo, FlowError> {
        let stage = Stage::Voucher;
        let booking_id = confirmation.booking_id.as_deref().ok_or_else(|| {
            FlowError::invalid_identifier(stage, "confirmation carries no booking id")
        })?;
        let request = json!({
            "BookingId": booking_id,
            "TokenId": session.auth_token,
            "EndUserIp": self.config.credentials.end_user_ip,
        });
        let envelope: VoucherEnvelope = self
            .post_json(stage, &self.config.endpoints.voucher_url, self.config.search_timeout, &request)
            .await?;
        let result = envelope.generate_voucher_result;
        ensure_ok(stage, result.response_status, result.error)?;

        let url = result.voucher_url.filter(|u| !u.is_empty()).ok_or_else(|| {
            FlowError::new(stage, ErrorKind::Network, "voucher response carried no url")
        })?;
        Ok(VoucherInfo { voucher_url: url })
    }
}
