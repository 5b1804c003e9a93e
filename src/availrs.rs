// XML supplier client (AvailRQ/AvailRS wire contract).
//
// Unlike the JSON contract there is no token exchange: credentials ride on
// every request, and availability responses carry the rooms inline. The
// client mints a local trace id per search and keeps the parsed result set
// in a per-trace store, so RoomLookup is served without a second network
// call. Everything downstream (block, book, voucher) is a plain XML POST.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::Rng;
use serde_json::{json, Map};
use tracing::{debug, info};

use crate::config::{SupplierConfig, SupplierCredentials};
use crate::error::{BlockFailure, BookFailure, ErrorKind, FlowError, Stage};
use crate::mapper::MappedRoom;
use crate::proxy::ProxyConfig;
use crate::supplier::{transport_error, SupplierClient};
use crate::types::{
    BookingConfirmation, BookingHold, Guest, HotelCandidate, Price, RoomOffer, SearchContext,
    SearchCriteria, SupplierId, SupplierSession, TraceId, VoucherInfo,
};

const HOLD_TTL_MINUTES: i64 = 15;
const SESSION_TTL_HOURS: i64 = 24;

/// How long a stored search result stays loadable. Past this the quoted
/// prices are stale anyway and the flow has to re-search.
const RESULT_TTL: Duration = Duration::from_secs(30 * 60);

/// One parsed availability response, held until its flow consumes it.
#[derive(Debug, Clone)]
struct StoredResult {
    inserted_at: Instant,
    hotels: Vec<ParsedHotel>,
}

pub struct AvailRsClient {
    config: SupplierConfig,
    http: reqwest::Client,
    /// Parsed availability keyed by trace id value. RoomLookup and the
    /// result-index check both resolve against this store. Entries are
    /// released when the flow blocks the room, and swept by age so
    /// abandoned searches cannot accumulate.
    results: DashMap<String, StoredResult>,
}

impl AvailRsClient {
    pub fn new(config: SupplierConfig, proxy: Option<&ProxyConfig>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = proxy {
            builder = proxy.apply(builder)?;
        }
        Ok(Self {
            config,
            http: builder.build()?,
            results: DashMap::new(),
        })
    }

    async fn post_xml(
        &self,
        stage: Stage,
        url: &str,
        timeout: Duration,
        body: String,
    ) -> Result<String, FlowError> {
        debug!(supplier = %self.config.id, stage = stage.name(), url, "outbound call");
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(body)
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
            .text()
            .await
            .map_err(|e| transport_error(stage, &e))
    }

    /// Drop stored results older than the TTL. Runs on every search, so
    /// abandoned flows cannot grow the store without bound.
    fn evict_stale(&self) {
        self.evict_older_than(RESULT_TTL);
    }

    fn evict_older_than(&self, ttl: Duration) {
        self.results.retain(|_, stored| stored.inserted_at.elapsed() < ttl);
    }

    /// Forget one trace's results; called once the flow has consumed them.
    fn release_trace(&self, trace: &str) {
        self.results.remove(trace);
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

fn parse_error(stage: Stage, detail: impl std::fmt::Display) -> FlowError {
    FlowError::new(
        stage,
        ErrorKind::Network,
        format!("unparseable supplier response: {detail}"),
    )
}

// --- parsed shapes ---------------------------------------------------------

#[derive(Debug, Clone)]
struct ParsedHotel {
    code: String,
    name: String,
    category: u8,
    options: Vec<ParsedOption>,
}

#[derive(Debug, Clone, Default)]
struct ParsedOption {
    room_code: String,
    room_name: String,
    meal_plan: String,
    payment_type: String,
    /// Opaque booking token from the Parameters block; echoed on block/book.
    search_token: String,
    amount: f64,
    currency: String,
}

#[derive(Debug, Clone, Default)]
struct PendingRoom {
    code: String,
    description: String,
    amount: f64,
    currency: String,
}

#[derive(Debug, Clone, Default)]
struct BlockRs {
    status: String,
    price_changed: bool,
    policy_changed: bool,
}

#[derive(Debug, Clone, Default)]
struct BookRs {
    status: String,
    locator: Option<String>,
    invoice: Option<String>,
}

// --- XML parsing -----------------------------------------------------------

fn attr_map(e: &BytesStart<'_>) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        map.insert(
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            String::from_utf8_lossy(&attr.value).into_owned(),
        );
    }
    Ok(map)
}

fn parse_avail_rs(xml: &str) -> Result<Vec<ParsedHotel>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut hotels: Vec<ParsedHotel> = Vec::new();
    let mut hotel: Option<ParsedHotel> = None;
    let mut plan = String::new();
    let mut payment = String::new();
    let mut token = String::new();
    let mut in_room = false;
    let mut pending: Vec<PendingRoom> = Vec::new();
    let mut room = PendingRoom::default();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"Hotel" => {
                let mut map = attr_map(&e)?;
                hotel = Some(ParsedHotel {
                    code: map
                        .remove("code")
                        .ok_or_else(|| "Hotel element missing code attribute".to_string())?,
                    name: map.remove("name").unwrap_or_default(),
                    category: map
                        .remove("category")
                        .and_then(|c| c.parse().ok())
                        .unwrap_or(0),
                    options: Vec::new(),
                });
            }
            Event::Start(e) if e.name().as_ref() == b"MealPlan" => {
                plan = attr_map(&e)?.remove("code").unwrap_or_default();
            }
            Event::Start(e) if e.name().as_ref() == b"Option" => {
                payment = attr_map(&e)?.remove("paymentType").unwrap_or_default();
                token.clear();
                pending.clear();
            }
            Event::Start(e) if e.name().as_ref() == b"Room" => {
                let mut map = attr_map(&e)?;
                room = PendingRoom {
                    code: map.remove("code").unwrap_or_default(),
                    description: map.remove("description").unwrap_or_default(),
                    ..PendingRoom::default()
                };
                in_room = true;
            }
            Event::Start(e) | Event::Empty(e) if in_room && e.name().as_ref() == b"Price" => {
                let mut map = attr_map(&e)?;
                room.currency = map.remove("currency").unwrap_or_default();
                room.amount = map
                    .remove("amount")
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(0.0);
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Parameter" => {
                let mut map = attr_map(&e)?;
                if map.get("key").map(String::as_str) == Some("search_token") {
                    token = map.remove("value").unwrap_or_default();
                }
            }
            Event::End(e) if e.name().as_ref() == b"Room" => {
                pending.push(std::mem::take(&mut room));
                in_room = false;
            }
            // Parameters trail the rooms inside an Option, so the token is
            // only attached once the Option closes.
            Event::End(e) if e.name().as_ref() == b"Option" => {
                if let Some(hotel) = hotel.as_mut() {
                    for r in pending.drain(..) {
                        hotel.options.push(ParsedOption {
                            room_code: r.code,
                            room_name: r.description,
                            meal_plan: plan.clone(),
                            payment_type: payment.clone(),
                            search_token: token.clone(),
                            amount: r.amount,
                            currency: r.currency,
                        });
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"Hotel" => {
                if let Some(h) = hotel.take() {
                    hotels.push(h);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(hotels)
}

fn parse_block_rs(xml: &str) -> Result<BlockRs, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"BlockRS" => {
                let mut map = attr_map(&e)?;
                return Ok(BlockRs {
                    status: map.remove("status").unwrap_or_default(),
                    price_changed: map.remove("priceChanged").as_deref() == Some("true"),
                    policy_changed: map.remove("policyChanged").as_deref() == Some("true"),
                });
            }
            Event::Eof => return Err("response carried no BlockRS element".to_string()),
            _ => {}
        }
    }
}

fn parse_book_rs(xml: &str) -> Result<BookRs, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut result = BookRs::default();
    let mut seen = false;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"BookRS" => {
                result.status = attr_map(&e)?.remove("status").unwrap_or_default();
                seen = true;
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Booking" => {
                let mut map = attr_map(&e)?;
                result.locator = map.remove("locator").filter(|l| !l.is_empty());
                result.invoice = map.remove("invoice").filter(|i| !i.is_empty());
            }
            Event::Eof => {
                return if seen {
                    Ok(result)
                } else {
                    Err("response carried no BookRS element".to_string())
                }
            }
            _ => {}
        }
    }
}

fn parse_voucher_rs(xml: &str) -> Result<Option<String>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Voucher" => {
                return Ok(attr_map(&e)?.remove("url").filter(|u| !u.is_empty()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

// --- request building ------------------------------------------------------

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn credentials_element(creds: &SupplierCredentials) -> String {
    format!(
        "  <Credentials client=\"{}\" user=\"{}\" password=\"{}\"/>\n",
        xml_escape(&creds.client_id),
        xml_escape(&creds.user_name),
        xml_escape(&creds.password)
    )
}

fn avail_rq(creds: &SupplierCredentials, criteria: &SearchCriteria) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<AvailRQ>\n");
    xml.push_str(&credentials_element(creds));
    xml.push_str(&format!(
        "  <currency>{}</currency>\n",
        xml_escape(&criteria.currency)
    ));
    xml.push_str(&format!(
        "  <nationality>{}</nationality>\n",
        xml_escape(&criteria.guest_nationality)
    ));
    xml.push_str(&format!("  <start_date>{}</start_date>\n", criteria.check_in));
    xml.push_str(&format!("  <end_date>{}</end_date>\n", criteria.check_out));
    xml.push_str(&format!(
        "  <Destination country=\"{}\" city=\"{}\"/>\n",
        xml_escape(&criteria.country_code),
        criteria.city_id
    ));
    xml.push_str("  <RoomCandidates>\n");
    for (i, room) in criteria.rooms.iter().enumerate() {
        xml.push_str(&format!("    <RoomCandidate id=\"{}\">\n", i + 1));
        xml.push_str("      <Paxes>\n");
        for _ in 0..room.adults {
            xml.push_str("        <Pax age=\"30\"/>\n");
        }
        for age in &room.child_ages {
            xml.push_str(&format!("        <Pax age=\"{age}\"/>\n"));
        }
        xml.push_str("      </Paxes>\n");
        xml.push_str("    </RoomCandidate>\n");
    }
    xml.push_str("  </RoomCandidates>\n</AvailRQ>\n");
    xml
}

fn rooms_element(rooms: &[MappedRoom]) -> String {
    let mut xml = String::from("  <Rooms>\n");
    for room in rooms {
        let code = room
            .get("RoomTypeCode")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let plan = room
            .get("RatePlanCode")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        xml.push_str(&format!(
            "    <Room code=\"{}\" plan=\"{}\"/>\n",
            xml_escape(code),
            xml_escape(plan)
        ));
    }
    xml.push_str("  </Rooms>\n");
    xml
}

fn block_rq(
    creds: &SupplierCredentials,
    flow_ref: &str,
    token: &str,
    rooms: &[MappedRoom],
) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<BlockRQ>\n");
    xml.push_str(&credentials_element(creds));
    xml.push_str(&format!(
        "  <reference>{}</reference>\n",
        xml_escape(flow_ref)
    ));
    xml.push_str(&format!(
        "  <search_token>{}</search_token>\n",
        xml_escape(token)
    ));
    xml.push_str(&rooms_element(rooms));
    xml.push_str("</BlockRQ>\n");
    xml
}

fn book_rq(
    creds: &SupplierCredentials,
    flow_ref: &str,
    token: &str,
    rooms: &[MappedRoom],
    guests: &[Guest],
) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<BookRQ>\n");
    xml.push_str(&credentials_element(creds));
    xml.push_str(&format!(
        "  <reference>{}</reference>\n",
        xml_escape(flow_ref)
    ));
    xml.push_str(&format!(
        "  <search_token>{}</search_token>\n",
        xml_escape(token)
    ));
    xml.push_str(&rooms_element(rooms));
    xml.push_str("  <Paxes>\n");
    for guest in guests {
        xml.push_str(&format!(
            "    <Pax title=\"{}\" name=\"{}\" surname=\"{}\" age=\"{}\" type=\"{}\"/>\n",
            xml_escape(&guest.title),
            xml_escape(&guest.first_name),
            xml_escape(&guest.last_name),
            guest.age,
            guest.pax_type.code()
        ));
    }
    xml.push_str("  </Paxes>\n</BookRQ>\n");
    xml
}

fn voucher_rq(creds: &SupplierCredentials, locator: &str) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<VoucherRQ>\n");
    xml.push_str(&credentials_element(creds));
    xml.push_str(&format!("  <locator>{}</locator>\n", xml_escape(locator)));
    xml.push_str("</VoucherRQ>\n");
    xml
}

// --- offer conversion ------------------------------------------------------

fn offer_from_option(opt: &ParsedOption) -> RoomOffer {
    // Lowercase spellings on purpose: the mapper resolves them through its
    // alternate-field lists and coerces the price object into the write
    // shape, same as for any other supplier.
    let mut raw = Map::new();
    raw.insert("RoomTypeCode".into(), json!(opt.room_code));
    raw.insert("RoomName".into(), json!(opt.room_name));
    raw.insert("RatePlanCode".into(), json!(opt.search_token));
    raw.insert("MealPlan".into(), json!(opt.meal_plan));
    raw.insert("PaymentType".into(), json!(opt.payment_type));
    raw.insert(
        "price".into(),
        json!({"amount": opt.amount, "currency": opt.currency}),
    );
    RoomOffer {
        room_type_code: opt.room_code.clone(),
        room_type_name: opt.room_name.clone(),
        rate_plan_code: if opt.search_token.is_empty() {
            None
        } else {
            Some(opt.search_token.clone())
        },
        price: Price::new(&opt.currency, opt.amount),
        raw,
    }
}

// ---------------------------------------------------------------------------

#[async_trait]
impl SupplierClient for AvailRsClient {
    fn id(&self) -> &SupplierId {
        &self.config.id
    }

    fn search_timeout(&self) -> Duration {
        self.config.search_timeout
    }

    async fn authenticate(&self) -> Result<SupplierSession, FlowError> {
        // No token exchange on this contract; the session exists so the
        // flow still carries an expiring credential handle.
        let now = Utc::now();
        let session = SupplierSession {
            supplier_id: self.config.id.clone(),
            auth_token: format!(
                "LOCAL-{}-{:08X}",
                now.timestamp(),
                rand::thread_rng().gen::<u32>()
            ),
            issued_at: now,
            expires_at: now + ChronoDuration::hours(SESSION_TTL_HOURS),
        };
        info!(supplier = %self.config.id, token = %session.token_preview(), "session minted");
        Ok(session)
    }

    async fn search(
        &self,
        _session: &SupplierSession,
        criteria: &SearchCriteria,
    ) -> Result<(SearchContext, Vec<HotelCandidate>), FlowError> {
        let stage = Stage::Searching;
        let body = avail_rq(&self.config.credentials, criteria);
        let xml = self
            .post_xml(stage, &self.config.endpoints.search_url, self.config.search_timeout, body)
            .await?;
        let hotels = parse_avail_rs(&xml).map_err(|e| parse_error(stage, e))?;

        let trace_value = format!(
            "AV-{}-{:08X}",
            Utc::now().timestamp_millis(),
            rand::thread_rng().gen::<u32>()
        );
        let ctx = SearchContext {
            trace_id: TraceId::new(self.config.id.clone(), trace_value.clone()),
            supplier_id: self.config.id.clone(),
            city_id: criteria.city_id,
            check_in: criteria.check_in,
            check_out: criteria.check_out,
            rooms: criteria.rooms.clone(),
            currency: criteria.currency.clone(),
            guest_nationality: criteria.guest_nationality.clone(),
        };

        let candidates: Vec<HotelCandidate> = hotels
            .iter()
            .enumerate()
            .map(|(index, hotel)| {
                let cheapest = hotel
                    .options
                    .iter()
                    .map(|o| o.amount)
                    .fold(f64::INFINITY, f64::min);
                let currency = hotel
                    .options
                    .first()
                    .map(|o| o.currency.clone())
                    .unwrap_or_else(|| criteria.currency.clone());
                HotelCandidate {
                    result_index: index as i64,
                    hotel_code: hotel.code.clone(),
                    hotel_name: hotel.name.clone(),
                    star_rating: hotel.category,
                    price: Price::new(
                        currency,
                        if cheapest.is_finite() { cheapest } else { 0.0 },
                    ),
                    supplier_id: self.config.id.clone(),
                }
            })
            .collect();

        info!(
            supplier = %self.config.id,
            trace = %trace_value,
            hotels = candidates.len(),
            "search complete"
        );
        self.evict_stale();
        self.results.insert(
            trace_value,
            StoredResult {
                inserted_at: Instant::now(),
                hotels,
            },
        );
        Ok((ctx, candidates))
    }

    async fn room_details(
        &self,
        _session: &SupplierSession,
        ctx: &SearchContext,
        candidate: &HotelCandidate,
    ) -> Result<Vec<RoomOffer>, FlowError> {
        let stage = Stage::RoomLookup;
        self.trace_guard(stage, &ctx.trace_id)?;
        let stored = self.results.get(&ctx.trace_id.value).ok_or_else(|| {
            FlowError::invalid_identifier(
                stage,
                format!("trace id {} has no stored result set", ctx.trace_id.value),
            )
        })?;
        let hotel = stored
            .hotels
            .get(candidate.result_index as usize)
            .filter(|h| h.code == candidate.hotel_code)
            .ok_or_else(|| {
                FlowError::invalid_identifier(
                    stage,
                    format!(
                        "result index {} does not resolve to hotel {} in this trace",
                        candidate.result_index, candidate.hotel_code
                    ),
                )
            })?;
        Ok(hotel.options.iter().map(offer_from_option).collect())
    }

    async fn block_room(
        &self,
        _session: &SupplierSession,
        ctx: &SearchContext,
        _candidate: &HotelCandidate,
        rooms: &[MappedRoom],
        flow_ref: &str,
    ) -> Result<BookingHold, FlowError> {
        let stage = Stage::Blocking;
        self.trace_guard(stage, &ctx.trace_id)?;
        let token = rooms
            .first()
            .and_then(|r| r.get("RatePlanCode"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let body = block_rq(&self.config.credentials, flow_ref, token, rooms);
        let xml = self
            .post_xml(stage, &self.config.endpoints.block_url, self.config.book_timeout, body)
            .await?;
        let result = parse_block_rs(&xml).map_err(|e| parse_error(stage, e))?;

        match result.status.as_str() {
            "OK" => {}
            "NO_AVAILABILITY" => {
                return Err(FlowError::new(
                    stage,
                    ErrorKind::Block(BlockFailure::NoAvailability),
                    "room no longer available",
                ))
            }
            other => {
                return Err(FlowError::new(
                    stage,
                    ErrorKind::Block(BlockFailure::Other),
                    format!("block returned status {other}"),
                ))
            }
        }

        // The flow is past RoomLookup for good; the stored results have
        // served their purpose.
        self.release_trace(&ctx.trace_id.value);

        let now = Utc::now();
        Ok(BookingHold {
            booking_id: None,
            blocked_at: now,
            expires_at: now + ChronoDuration::minutes(HOLD_TTL_MINUTES),
            price_changed: result.price_changed,
            policy_changed: result.policy_changed,
            confirmed_rooms: vec![],
        })
    }

    async fn book(
        &self,
        _session: &SupplierSession,
        ctx: &SearchContext,
        _candidate: &HotelCandidate,
        _hold: &BookingHold,
        rooms: &[MappedRoom],
        guests: &[Guest],
        flow_ref: &str,
    ) -> Result<BookingConfirmation, FlowError> {
        let stage = Stage::Booking;
        self.trace_guard(stage, &ctx.trace_id)?;
        let token = rooms
            .first()
            .and_then(|r| r.get("RatePlanCode"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let body = book_rq(&self.config.credentials, flow_ref, token, rooms, guests);
        let xml = self
            .post_xml(stage, &self.config.endpoints.book_url, self.config.book_timeout, body)
            .await?;
        let result = parse_book_rs(&xml).map_err(|e| parse_error(stage, e))?;

        match result.status.as_str() {
            "CONFIRMED" => {}
            "REJECTED" => {
                return Err(FlowError::new(
                    stage,
                    ErrorKind::Book(BookFailure::Rejected),
                    "supplier declined the booking",
                ))
            }
            other => {
                return Err(FlowError::new(
                    stage,
                    ErrorKind::Book(BookFailure::Other),
                    format!("book returned status {other}"),
                ))
            }
        }

        let locator = result.locator.ok_or_else(|| {
            FlowError::new(
                stage,
                ErrorKind::Book(BookFailure::Other),
                "book response carried no locator",
            )
        })?;
        let confirmation = BookingConfirmation {
            confirmation_number: locator.clone(),
            booking_id: Some(locator.clone()),
            booking_reference: Some(locator),
            status: "Confirmed".to_string(),
            invoice_number: result.invoice,
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
        _session: &SupplierSession,
        confirmation: &BookingConfirmation,
    ) -> Result<VoucherInfo, FlowError> {
        let stage = Stage::Voucher;
        let locator = confirmation
            .booking_reference
            .as_deref()
            .unwrap_or(&confirmation.confirmation_number);
        let body = voucher_rq(&self.config.credentials, locator);
        let xml = self
            .post_xml(stage, &self.config.endpoints.voucher_url, self.config.search_timeout, body)
            .await?;
        let url = parse_voucher_rs(&xml)
            .map_err(|e| parse_error(stage, e))?
            .ok_or_else(|| {
                FlowError::new(stage, ErrorKind::Network, "voucher response carried no url")
            })?;
        Ok(VoucherInfo { voucher_url: url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_supplier_config;
    use crate::mapper;
    use crate::types::RoomOccupancy;
    use chrono::NaiveDate;

    const SAMPLE_AVAIL_RS: &str = r#"
<AvailRS>
  <Hotels>
    <Hotel code="39776757" name="Days Inn By Wyndham Fargo" category="3">
      <MealPlans>
        <MealPlan code="RO">
          <Options>
            <Option type="Hotel" paymentType="MerchantPay" status="OK">
              <Price currency="GBP" amount="84.82" binding="false"/>
              <Rooms>
                <Room id="1#ND1" code="ND1" description="ROOM, QUEEN BED" numberOfUnits="1" nonRefundable="false">
                  <Price currency="GBP" amount="84.82" binding="false"/>
                </Room>
                <Room id="1#ND2" code="ND2" description="ROOM, TWO DOUBLE BEDS" numberOfUnits="1" nonRefundable="false">
                  <Price currency="GBP" amount="92.10" binding="false"/>
                </Room>
              </Rooms>
              <Parameters>
                <Parameter key="search_token" value="39776757|2025-12-15|2025-12-18|A|IN|GBP"/>
              </Parameters>
            </Option>
          </Options>
        </MealPlan>
      </MealPlans>
    </Hotel>
  </Hotels>
</AvailRS>
"#;

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            destination: "Fargo".into(),
            city_id: 800_121,
            country_code: "US".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(2)],
            currency: "GBP".into(),
            guest_nationality: "IN".into(),
        }
    }

    #[test]
    fn avail_rs_parses_rooms_with_token_and_prices() {
        let hotels = parse_avail_rs(SAMPLE_AVAIL_RS).unwrap();
        assert_eq!(hotels.len(), 1);
        let hotel = &hotels[0];
        assert_eq!(hotel.code, "39776757");
        assert_eq!(hotel.category, 3);
        assert_eq!(hotel.options.len(), 2);
        assert_eq!(hotel.options[0].room_code, "ND1");
        assert_eq!(hotel.options[0].amount, 84.82);
        assert_eq!(hotel.options[1].amount, 92.10);
        // The token appears after the rooms but binds to every option.
        assert!(hotel.options[1].search_token.contains("39776757"));
        assert_eq!(hotel.options[0].meal_plan, "RO");
    }

    #[test]
    fn parsed_option_maps_through_the_booking_mapper() {
        let hotels = parse_avail_rs(SAMPLE_AVAIL_RS).unwrap();
        let offers: Vec<RoomOffer> = hotels[0].options.iter().map(offer_from_option).collect();
        let mapped = mapper::map_for_booking(&offers, "GBP");
        assert!(mapper::validate_booking_rooms(&mapped).is_empty());
        let prices = mapper::price_array_of(&mapped[0]).unwrap();
        assert_eq!(prices[0]["amount"].as_f64(), Some(84.82));
        assert_eq!(prices[0]["currency"].as_str(), Some("GBP"));
    }

    #[test]
    fn avail_rq_carries_criteria_and_escapes_text() {
        let mut c = criteria();
        c.guest_nationality = "A&B".into();
        let xml = avail_rq(&test_supplier_config("availrs").credentials, &c);
        assert!(xml.contains("<start_date>2025-12-15</start_date>"));
        assert!(xml.contains("<end_date>2025-12-18</end_date>"));
        assert!(xml.contains("<currency>GBP</currency>"));
        assert!(xml.contains("A&amp;B"));
        assert!(xml.contains("<Pax age=\"30\"/>"));
    }

    #[test]
    fn block_rs_and_book_rs_parse_status_attributes() {
        let block = parse_block_rs(r#"<BlockRS status="OK" priceChanged="true"/>"#).unwrap();
        assert_eq!(block.status, "OK");
        assert!(block.price_changed);
        assert!(!block.policy_changed);

        let book = parse_book_rs(
            r#"<BookRS status="CONFIRMED"><Booking locator="LOC-77" invoice="INV-4"/></BookRS>"#,
        )
        .unwrap();
        assert_eq!(book.status, "CONFIRMED");
        assert_eq!(book.locator.as_deref(), Some("LOC-77"));
        assert_eq!(book.invoice.as_deref(), Some("INV-4"));

        assert!(parse_block_rs("<Nothing/>").is_err());
    }

    #[test]
    fn voucher_rs_yields_url_or_none() {
        let url = parse_voucher_rs(
            r#"<VoucherRS status="OK"><Voucher url="https://v.example.com/LOC-77.pdf"/></VoucherRS>"#,
        )
        .unwrap();
        assert_eq!(url.as_deref(), Some("https://v.example.com/LOC-77.pdf"));
        assert_eq!(parse_voucher_rs(r#"<VoucherRS status="OK"/>"#).unwrap(), None);
    }

    #[tokio::test]
    async fn room_details_serves_from_the_trace_store() {
        let client = AvailRsClient::new(test_supplier_config("availrs"), None).unwrap();
        let hotels = parse_avail_rs(SAMPLE_AVAIL_RS).unwrap();
        client.results.insert(
            "AV-TEST-1".to_string(),
            StoredResult {
                inserted_at: Instant::now(),
                hotels,
            },
        );

        let session = client.authenticate().await.unwrap();
        assert!(!session.is_expired(Utc::now()));

        let ctx = SearchContext {
            trace_id: TraceId::new(SupplierId::new("availrs"), "AV-TEST-1"),
            supplier_id: SupplierId::new("availrs"),
            city_id: 800_121,
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(2)],
            currency: "GBP".into(),
            guest_nationality: "IN".into(),
        };
        let candidate = HotelCandidate {
            result_index: 0,
            hotel_code: "39776757".into(),
            hotel_name: "Days Inn By Wyndham Fargo".into(),
            star_rating: 3,
            price: Price::new("GBP", 84.82),
            supplier_id: SupplierId::new("availrs"),
        };
        let offers = client.room_details(&session, &ctx, &candidate).await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].room_type_code, "ND1");
    }

    #[tokio::test]
    async fn released_trace_no_longer_serves_room_details() {
        let client = AvailRsClient::new(test_supplier_config("availrs"), None).unwrap();
        let hotels = parse_avail_rs(SAMPLE_AVAIL_RS).unwrap();
        client.results.insert(
            "AV-TEST-2".to_string(),
            StoredResult {
                inserted_at: Instant::now(),
                hotels,
            },
        );
        client.release_trace("AV-TEST-2");

        let session = client.authenticate().await.unwrap();
        let ctx = SearchContext {
            trace_id: TraceId::new(SupplierId::new("availrs"), "AV-TEST-2"),
            supplier_id: SupplierId::new("availrs"),
            city_id: 800_121,
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(2)],
            currency: "GBP".into(),
            guest_nationality: "IN".into(),
        };
        let candidate = HotelCandidate {
            result_index: 0,
            hotel_code: "39776757".into(),
            hotel_name: "Days Inn".into(),
            star_rating: 3,
            price: Price::new("GBP", 84.82),
            supplier_id: SupplierId::new("availrs"),
        };
        let err = client
            .room_details(&session, &ctx, &candidate)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIdentifier);
    }

    #[test]
    fn stale_results_are_swept_fresh_ones_kept() {
        let client = AvailRsClient::new(test_supplier_config("availrs"), None).unwrap();
        let hotels = parse_avail_rs(SAMPLE_AVAIL_RS).unwrap();
        client.results.insert(
            "AV-A".to_string(),
            StoredResult {
                inserted_at: Instant::now(),
                hotels: hotels.clone(),
            },
        );
        client.results.insert(
            "AV-B".to_string(),
            StoredResult {
                inserted_at: Instant::now(),
                hotels,
            },
        );

        // Generous TTL keeps both; zero TTL classifies both as stale.
        client.evict_older_than(Duration::from_secs(60));
        assert_eq!(client.results.len(), 2);
        client.evict_older_than(Duration::ZERO);
        assert_eq!(client.results.len(), 0);
    }

    #[tokio::test]
    async fn foreign_or_unknown_trace_is_rejected() {
        let client = AvailRsClient::new(test_supplier_config("availrs"), None).unwrap();
        let session = client.authenticate().await.unwrap();
        let candidate = HotelCandidate {
            result_index: 0,
            hotel_code: "39776757".into(),
            hotel_name: "Days Inn".into(),
            star_rating: 3,
            price: Price::new("GBP", 84.82),
            supplier_id: SupplierId::new("availrs"),
        };

        let foreign = SearchContext {
            trace_id: TraceId::new(SupplierId::new("tbo"), "MT-1"),
            supplier_id: SupplierId::new("tbo"),
            city_id: 1,
            check_in: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 18).unwrap(),
            rooms: vec![RoomOccupancy::adults(1)],
            currency: "GBP".into(),
            guest_nationality: "IN".into(),
        };
        let err = client
            .room_details(&session, &foreign, &candidate)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIdentifier);

        let unknown = SearchContext {
            trace_id: TraceId::new(SupplierId::new("availrs"), "AV-UNKNOWN"),
            ..foreign
        };
        let err = client
            .room_details(&session, &unknown, &candidate)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIdentifier);
    }
}
