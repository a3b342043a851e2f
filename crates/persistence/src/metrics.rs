//! Query and pool metrics for the PostgreSQL stores.

use std::time::Instant;

use metrics::{gauge, histogram};
use sqlx::PgPool;

pub const QUERY_DURATION: &str = "store_query_duration_seconds";
pub const POOL_CONNECTIONS: &str = "store_pool_connections";

pub fn record_query_duration(operation: &'static str, duration_secs: f64) {
    histogram!(QUERY_DURATION, "operation" => operation).record(duration_secs);
}

/// Pool gauges, split by connection state. Refreshed on every scrape.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!(POOL_CONNECTIONS, "state" => "active").set(size.saturating_sub(idle) as f64);
    gauge!(POOL_CONNECTIONS, "state" => "idle").set(idle as f64);
    gauge!(POOL_CONNECTIONS, "state" => "max").set(f64::from(pool.options().get_max_connections()));
}

/// Times one store operation; `record` emits the histogram sample.
///
/// ```ignore
/// let timer = QueryTimer::new("claim_due_deliveries");
/// let rows = query.fetch_all(&self.pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    operation: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.operation, self.start.elapsed().as_secs_f64());
    }
}
