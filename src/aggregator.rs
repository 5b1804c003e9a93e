// Multi-supplier search fan-out.
//
// All enabled suppliers are queried concurrently; one slow or failing
// supplier never hides the others' results. A supplier whose circuit is
// open is skipped up front so the aggregate latency does not pay its
// cooldown, and its report says so.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::types::{HotelCandidate, SearchCriteria, SupplierId};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no suppliers configured")]
    NoSuppliers,
    #[error("all suppliers failed: {0}")]
    AllFailed(String),
}

/// Per-supplier diagnostics for one aggregate search.
#[derive(Debug, Clone)]
pub struct SupplierReport {
    pub success: bool,
    pub count: usize,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub circuit_open: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateSearch {
    pub results: Vec<HotelCandidate>,
    pub per_supplier: HashMap<SupplierId, SupplierReport>,
}

pub struct Aggregator {
    engines: Vec<Arc<Orchestrator>>,
}

impl Aggregator {
    pub fn new(engines: Vec<Arc<Orchestrator>>) -> Self {
        Self { engines }
    }

    pub fn suppliers(&self) -> impl Iterator<Item = &SupplierId> {
        self.engines.iter().map(|e| e.supplier_id())
    }

    pub async fn search_all(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<AggregateSearch, AggregateError> {
        if self.engines.is_empty() {
            return Err(AggregateError::NoSuppliers);
        }

        let calls = self.engines.iter().map(|engine| async move {
            let supplier = engine.supplier_id().clone();

            // Peek without consuming the half-open probe slot; an engine
            // run elsewhere keeps the right to probe.
            if engine.breakers().is_open(&supplier) {
                warn!(supplier = %supplier, "skipped, circuit open");
                let report = SupplierReport {
                    success: false,
                    count: 0,
                    latency_ms: 0,
                    error: Some("circuit open".to_string()),
                    circuit_open: true,
                };
                return (supplier, report, Vec::new());
            }

            let started = Instant::now();
            let outcome = timeout(engine.search_timeout(), engine.search_once(criteria)).await;
            let latency = started.elapsed();
            let latency_ms = latency.as_millis() as u64;

            match outcome {
                Ok(Ok(candidates)) => {
                    info!(
                        supplier = %supplier,
                        hotels = candidates.len(),
                        latency_ms,
                        "supplier search ok"
                    );
                    let report = SupplierReport {
                        success: true,
                        count: candidates.len(),
                        latency_ms,
                        error: None,
                        circuit_open: false,
                    };
                    (supplier, report, candidates)
                }
                Ok(Err(err)) => {
                    warn!(supplier = %supplier, error = %err, latency_ms, "supplier search failed");
                    let report = SupplierReport {
                        success: false,
                        count: 0,
                        latency_ms,
                        error: Some(err.to_string()),
                        circuit_open: false,
                    };
                    (supplier, report, Vec::new())
                }
                Err(_) => {
                    warn!(supplier = %supplier, latency_ms, "supplier search timed out");
                    // The inner call was cancelled before it could record.
                    engine.breakers().record(&supplier, false, latency);
                    let report = SupplierReport {
                        success: false,
                        count: 0,
                        latency_ms,
                        error: Some(format!(
                            "search timed out after {}ms",
                            engine.search_timeout().as_millis()
                        )),
                        circuit_open: false,
                    };
                    (supplier, report, Vec::new())
                }
            }
        });

        let mut results = Vec::new();
        let mut per_supplier = HashMap::new();
        for (supplier, report, candidates) in join_all(calls).await {
            results.extend(candidates);
            per_supplier.insert(supplier, report);
        }

        if results.is_empty() && per_supplier.values().all(|r| !r.success) {
            let detail: Vec<String> = per_supplier
                .iter()
                .map(|(id, report)| {
                    format!(
                        "{id}: {}",
                        report.error.as_deref().unwrap_or("no results")
                    )
                })
                .collect();
            return Err(AggregateError::AllFailed(detail.join("; ")));
        }

        Ok(AggregateSearch {
            results,
            per_supplier,
        })
    }
}
