// Hotel booking orchestration: multi-supplier search, room mapping and the
// search-to-voucher booking flow, with per-supplier circuit breaking.

pub mod aggregator;
pub mod availrs;
pub mod breaker;
pub mod config;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod proxy;
pub mod session;
pub mod supplier;
pub mod tbo;
pub mod types;

// Re-export key types for convenience
pub use aggregator::{AggregateError, AggregateSearch, Aggregator, SupplierReport};
pub use availrs::AvailRsClient;
pub use breaker::{BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, EngineConfig, SupplierConfig, SupplierCredentials, SupplierEndpoints};
pub use error::{BlockFailure, BookFailure, ErrorKind, FlowError, Stage};
pub use mapper::{map_for_booking, validate_booking_rooms, MappedRoom};
pub use orchestrator::{BookingOutcome, BookingRequest, Orchestrator};
pub use proxy::{ProxyConfig, ProxyError};
pub use session::FlowContext;
pub use supplier::SupplierClient;
pub use tbo::TboClient;
pub use types::{
    BookingConfirmation, BookingHold, Guest, HotelCandidate, Price, RoomOffer, SearchContext,
    SearchCriteria, SupplierId, SupplierSession, TraceId, VoucherInfo,
};
