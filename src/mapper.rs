// Room mapper: converts a supplier's room-search representation into the
// shape its block/book endpoints require. Suppliers are not internally
// consistent between read and write schemas, so this is where the seams are
// papered over: index injection, price object->array coercion, enum
// normalization, alternate field spellings, and defaults for fields the
// write side mandates but the read side omits.

use serde_json::{json, Map, Number, Value};

use crate::error::{FieldIssue, FieldProblem};
use crate::types::{Price, RoomOffer};

// Ordered candidate spellings per logical field; first non-empty match wins.
// Spellings vary between supplier response versions, so the lists are
// resolved once here instead of duck-typing at every call site.
pub const ROOM_TYPE_CODE_FIELDS: &[&str] = &["RoomTypeCode", "roomTypeCode", "room_type_code"];
pub const ROOM_TYPE_NAME_FIELDS: &[&str] =
    &["RoomTypeName", "roomTypeName", "room_type_name", "RoomName"];
pub const RATE_PLAN_CODE_FIELDS: &[&str] =
    &["RatePlanCode", "PlanCode", "ratePlanCode", "rate_plan_code"];
pub const PRICE_FIELDS: &[&str] = &["Price", "RoomPrice", "price"];
pub const AMOUNT_FIELDS: &[&str] = &["OfferedPrice", "PublishedPrice", "Amount", "amount"];
pub const CURRENCY_FIELDS: &[&str] = &["CurrencyCode", "Currency", "currency"];
pub const SMOKING_FIELDS: &[&str] =
    &["SmokingPreference", "smokingPreference", "smoking_preference"];
pub const SUPPLEMENT_FIELDS: &[&str] = &["SupplementList", "Supplements", "supplements"];
pub const CATEGORY_FIELDS: &[&str] = &["CategoryId", "categoryId", "category_id"];

/// First candidate key present with a non-empty value.
pub fn first_non_empty<'a>(obj: &'a Map<String, Value>, candidates: &[&str]) -> Option<&'a Value> {
    for key in candidates {
        if let Some(value) = obj.get(*key) {
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            };
            if !empty {
                return Some(value);
            }
        }
    }
    None
}

/// Normalize a smoking preference to the integer code the write endpoints
/// expect: NoPreference=0, Smoking=1, NonSmoking=2, Either=3. Integers in
/// range pass through; absent values default to NoPreference.
pub fn smoking_code(value: Option<&Value>) -> Result<i64, String> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(code @ 0..=3) => Ok(code),
            _ => Err(format!("smoking preference code out of range: {n}")),
        },
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "nopreference" => Ok(0),
            "smoking" => Ok(1),
            "nonsmoking" => Ok(2),
            "either" => Ok(3),
            other => Err(format!("unknown smoking preference '{other}'")),
        },
        Some(other) => Err(format!("smoking preference has wrong type: {other}")),
    }
}

/// Extract a normalized Price from a supplier price value, which may be a
/// full object or a bare number. The raw object is preserved in `extra`.
pub fn price_from_value(value: &Value, fallback_currency: &str) -> Price {
    match value {
        Value::Object(obj) => {
            let amount = first_non_empty(obj, AMOUNT_FIELDS)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let currency = first_non_empty(obj, CURRENCY_FIELDS)
                .and_then(Value::as_str)
                .unwrap_or(fallback_currency)
                .to_string();
            Price {
                currency,
                amount,
                extra: obj.clone(),
            }
        }
        Value::Number(n) => Price::new(fallback_currency, n.as_f64().unwrap_or(0.0)),
        _ => Price::new(fallback_currency, 0.0),
    }
}

/// A room payload in the write-side shape, ready for block/book.
#[derive(Debug, Clone)]
pub struct MappedRoom {
    payload: Map<String, Value>,
}

impl MappedRoom {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// The one-element price array of a mapped room, if present.
pub fn price_array_of(room: &MappedRoom) -> Option<&Vec<Value>> {
    room.get("Price").and_then(Value::as_array)
}

/// Build write-side room payloads from offers as returned by room details.
/// One payload per requested room, `RoomIndex` injected zero-based. Missing
/// fields are left absent for `validate_booking_rooms` to report; mapping
/// itself never fails.
pub fn map_for_booking(offers: &[RoomOffer], search_currency: &str) -> Vec<MappedRoom> {
    offers
        .iter()
        .enumerate()
        .map(|(index, offer)| map_room(index, offer, search_currency))
        .collect()
}

fn map_room(index: usize, offer: &RoomOffer, search_currency: &str) -> MappedRoom {
    let raw = &offer.raw;
    let mut payload = Map::new();

    // The read side carries no room index; the write side mandates one.
    payload.insert("RoomIndex".into(), json!(index));

    for (canonical, candidates) in [
        ("RoomTypeCode", ROOM_TYPE_CODE_FIELDS),
        ("RoomTypeName", ROOM_TYPE_NAME_FIELDS),
        ("RatePlanCode", RATE_PLAN_CODE_FIELDS),
        ("CategoryId", CATEGORY_FIELDS),
    ] {
        if let Some(value) = first_non_empty(raw, candidates) {
            payload.insert(canonical.into(), value.clone());
        }
    }
    if let Some(room_id) = first_non_empty(raw, &["RoomId", "roomId", "room_id"]) {
        payload.insert("RoomId".into(), room_id.clone());
    }

    if let Some(price) = first_non_empty(raw, PRICE_FIELDS) {
        payload.insert(
            "Price".into(),
            Value::Array(coerce_price_array(price, search_currency)),
        );
    }

    match smoking_code(first_non_empty(raw, SMOKING_FIELDS)) {
        Ok(code) => {
            payload.insert("SmokingPreference".into(), Value::Number(Number::from(code)));
        }
        // Keep the original value so validation can name what was wrong.
        Err(_) => {
            if let Some(original) = first_non_empty(raw, SMOKING_FIELDS) {
                payload.insert("SmokingPreference".into(), original.clone());
            }
        }
    }

    let supplements = first_non_empty(raw, SUPPLEMENT_FIELDS)
        .cloned()
        .unwrap_or_else(|| Value::Array(vec![]));
    payload.insert("SupplementList".into(), supplements);

    MappedRoom { payload }
}

/// Coerce a price into the one-element-array shape the write side expects.
/// An already-array read shape passes through unchanged; monetary sub-fields
/// are never renamed or dropped. Price objects missing a currency get the
/// search currency injected.
fn coerce_price_array(price: &Value, search_currency: &str) -> Vec<Value> {
    let mut entries = match price {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    for entry in &mut entries {
        if let Value::Object(obj) = entry {
            if first_non_empty(obj, CURRENCY_FIELDS).is_none() {
                obj.insert("CurrencyCode".into(), json!(search_currency));
            }
        }
    }
    entries
}

/// Structural check of mandatory write-side fields. Returns every specific
/// missing or malformed field rather than a single boolean, so callers can
/// log exactly what failed before the supplier is ever contacted.
pub fn validate_booking_rooms(rooms: &[MappedRoom]) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    for (index, room) in rooms.iter().enumerate() {
        let mut issue = |field: &str, problem: FieldProblem| {
            issues.push(FieldIssue {
                room_index: index,
                field: field.to_string(),
                problem,
            });
        };

        match room.get("RoomIndex") {
            None => issue("RoomIndex", FieldProblem::Missing),
            Some(v) if v.as_u64().is_none() => {
                issue("RoomIndex", FieldProblem::Malformed("not an integer".into()))
            }
            _ => {}
        }

        for field in ["RoomTypeCode", "RoomTypeName", "RatePlanCode"] {
            match room.get(field) {
                None => issue(field, FieldProblem::Missing),
                Some(Value::String(s)) if s.is_empty() => issue(field, FieldProblem::Missing),
                Some(Value::String(_)) => {}
                Some(other) => issue(
                    field,
                    FieldProblem::Malformed(format!("expected string, got {other}")),
                ),
            }
        }

        match room.get("Price") {
            None => issue("Price", FieldProblem::Missing),
            Some(Value::Array(entries)) if entries.is_empty() => {
                issue("Price", FieldProblem::Malformed("empty price array".into()))
            }
            Some(Value::Array(entries)) => {
                for entry in entries {
                    match entry {
                        Value::Object(obj) => {
                            let amount = first_non_empty(obj, AMOUNT_FIELDS).and_then(Value::as_f64);
                            match amount {
                                None => issue(
                                    "Price",
                                    FieldProblem::Malformed("no numeric amount field".into()),
                                ),
                                Some(a) if a <= 0.0 => issue(
                                    "Price",
                                    FieldProblem::Malformed(format!("non-positive amount {a}")),
                                ),
                                _ => {}
                            }
                            if first_non_empty(obj, CURRENCY_FIELDS)
                                .and_then(Value::as_str)
                                .map_or(true, str::is_empty)
                            {
                                issue("Price", FieldProblem::Malformed("missing currency".into()));
                            }
                        }
                        other => issue(
                            "Price",
                            FieldProblem::Malformed(format!("entry is not an object: {other}")),
                        ),
                    }
                }
            }
            Some(other) => issue(
                "Price",
                FieldProblem::Malformed(format!("expected array, got {other}")),
            ),
        }

        match room.get("SmokingPreference") {
            None => issue("SmokingPreference", FieldProblem::Missing),
            Some(v) => match v.as_i64() {
                Some(0..=3) => {}
                _ => issue(
                    "SmokingPreference",
                    FieldProblem::Malformed(format!("expected code 0..=3, got {v}")),
                ),
            },
        }

        match room.get("SupplementList") {
            None => issue("SupplementList", FieldProblem::Missing),
            Some(Value::Array(_)) => {}
            Some(other) => issue(
                "SupplementList",
                FieldProblem::Malformed(format!("expected array, got {other}")),
            ),
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offer_from_raw(raw: Value) -> RoomOffer {
        let raw = raw.as_object().cloned().unwrap();
        let price = first_non_empty(&raw, PRICE_FIELDS)
            .map(|p| price_from_value(p, "USD"))
            .unwrap_or_else(|| Price::new("USD", 0.0));
        RoomOffer {
            room_type_code: first_non_empty(&raw, ROOM_TYPE_CODE_FIELDS)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            room_type_name: first_non_empty(&raw, ROOM_TYPE_NAME_FIELDS)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            rate_plan_code: first_non_empty(&raw, RATE_PLAN_CODE_FIELDS)
                .and_then(Value::as_str)
                .map(str::to_string),
            price,
            raw,
        }
    }

    fn full_offer() -> RoomOffer {
        offer_from_raw(json!({
            "RoomTypeCode": "DLX",
            "RoomTypeName": "Deluxe King",
            "RatePlanCode": "RP-9",
            "CategoryId": "CAT1",
            "SmokingPreference": "NoPreference",
            "Price": {
                "CurrencyCode": "USD",
                "OfferedPrice": 180.5,
                "PublishedPrice": 210.0,
                "Tax": 12.25
            }
        }))
    }

    #[test]
    fn injects_zero_based_room_index() {
        let offers = vec![full_offer(), full_offer(), full_offer()];
        let mapped = map_for_booking(&offers, "USD");
        for (i, room) in mapped.iter().enumerate() {
            assert_eq!(room.get("RoomIndex").unwrap().as_u64(), Some(i as u64));
        }
    }

    #[test]
    fn price_object_becomes_one_element_array_with_subfields_intact() {
        let mapped = map_for_booking(&[full_offer()], "USD");
        let prices = price_array_of(&mapped[0]).unwrap();
        assert_eq!(prices.len(), 1);
        let price = prices[0].as_object().unwrap();
        assert_eq!(price.get("OfferedPrice").unwrap().as_f64(), Some(180.5));
        assert_eq!(price.get("PublishedPrice").unwrap().as_f64(), Some(210.0));
        assert_eq!(price.get("Tax").unwrap().as_f64(), Some(12.25));
        assert_eq!(price.get("CurrencyCode").unwrap().as_str(), Some("USD"));
    }

    #[test]
    fn price_already_array_passes_through() {
        let offer = offer_from_raw(json!({
            "RoomTypeCode": "STD",
            "RoomTypeName": "Standard",
            "RatePlanCode": "RP-1",
            "Price": [{"Amount": 99.0, "Currency": "EUR"}]
        }));
        let mapped = map_for_booking(&[offer], "USD");
        let prices = price_array_of(&mapped[0]).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0]["Amount"].as_f64(), Some(99.0));
        assert_eq!(prices[0]["Currency"].as_str(), Some("EUR"));
    }

    #[test]
    fn search_currency_injected_when_price_has_none() {
        let offer = offer_from_raw(json!({
            "RoomTypeCode": "STD",
            "RoomTypeName": "Standard",
            "RatePlanCode": "RP-1",
            "Price": {"OfferedPrice": 75.0}
        }));
        let mapped = map_for_booking(&[offer], "AED");
        let prices = price_array_of(&mapped[0]).unwrap();
        assert_eq!(prices[0]["CurrencyCode"].as_str(), Some("AED"));
        assert_eq!(prices[0]["OfferedPrice"].as_f64(), Some(75.0));
    }

    #[test]
    fn missing_supplements_default_to_empty_array_never_null() {
        let mapped = map_for_booking(&[full_offer()], "USD");
        let supplements = mapped[0].get("SupplementList").unwrap();
        assert!(supplements.is_array());
        assert_eq!(supplements.as_array().unwrap().len(), 0);
    }

    #[test]
    fn smoking_preference_string_maps_to_code() {
        assert_eq!(smoking_code(Some(&json!("NoPreference"))), Ok(0));
        assert_eq!(smoking_code(Some(&json!("Smoking"))), Ok(1));
        assert_eq!(smoking_code(Some(&json!("nonsmoking"))), Ok(2));
        assert_eq!(smoking_code(Some(&json!("Either"))), Ok(3));
        assert_eq!(smoking_code(Some(&json!(2))), Ok(2));
        assert_eq!(smoking_code(None), Ok(0));
        assert!(smoking_code(Some(&json!("Balcony"))).is_err());
        assert!(smoking_code(Some(&json!(7))).is_err());
    }

    #[test]
    fn alternate_plan_code_spelling_resolves() {
        let offer = offer_from_raw(json!({
            "RoomTypeCode": "STD",
            "RoomTypeName": "Standard",
            "PlanCode": "LEGACY-PLAN",
            "Price": {"OfferedPrice": 50.0, "CurrencyCode": "USD"}
        }));
        let mapped = map_for_booking(&[offer], "USD");
        assert_eq!(
            mapped[0].get("RatePlanCode").unwrap().as_str(),
            Some("LEGACY-PLAN")
        );
    }

    #[test]
    fn first_non_empty_skips_null_and_empty_string() {
        let obj = json!({"RatePlanCode": "", "PlanCode": null, "ratePlanCode": "RP-2"});
        let obj = obj.as_object().unwrap();
        let resolved = first_non_empty(obj, RATE_PLAN_CODE_FIELDS).unwrap();
        assert_eq!(resolved.as_str(), Some("RP-2"));
    }

    #[test]
    fn validation_reports_each_missing_field() {
        let offer = offer_from_raw(json!({
            "RoomTypeName": "Standard"
        }));
        let mapped = map_for_booking(&[offer], "USD");
        let issues = validate_booking_rooms(&mapped);
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"RoomTypeCode"));
        assert!(fields.contains(&"RatePlanCode"));
        assert!(fields.contains(&"Price"));
        assert!(!fields.contains(&"RoomTypeName"));
        assert!(!fields.contains(&"SupplementList"));
    }

    #[test]
    fn validation_flags_unmappable_smoking_preference() {
        let offer = offer_from_raw(json!({
            "RoomTypeCode": "STD",
            "RoomTypeName": "Standard",
            "RatePlanCode": "RP-1",
            "SmokingPreference": "Balcony",
            "Price": {"OfferedPrice": 50.0, "CurrencyCode": "USD"}
        }));
        let mapped = map_for_booking(&[offer], "USD");
        let issues = validate_booking_rooms(&mapped);
        assert!(issues
            .iter()
            .any(|i| i.field == "SmokingPreference"
                && matches!(i.problem, FieldProblem::Malformed(_))));
    }

    #[test]
    fn fully_mapped_room_passes_validation() {
        let mapped = map_for_booking(&[full_offer()], "USD");
        assert!(validate_booking_rooms(&mapped).is_empty());
    }

    #[test]
    fn non_positive_amount_is_malformed() {
        let offer = offer_from_raw(json!({
            "RoomTypeCode": "STD",
            "RoomTypeName": "Standard",
            "RatePlanCode": "RP-1",
            "Price": {"OfferedPrice": 0.0, "CurrencyCode": "USD"}
        }));
        let mapped = map_for_booking(&[offer], "USD");
        let issues = validate_booking_rooms(&mapped);
        assert!(issues.iter().any(|i| i.field == "Price"));
    }
}
