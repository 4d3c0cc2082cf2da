//! Authorization counters.
//!
//! Emitted through the `metrics` facade; nothing is recorded until a
//! recorder is installed (see `custos-telemetry`).
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `custos_authz_decisions_total` | `outcome`, `state` |
//! | `custos_authz_cache_lookups_total` | `cache`, `result` |
//! | `custos_authz_queries_total` | `kind`, `result` |

use ::metrics::counter;

/// Enforcement outcomes by terminal state.
pub const DECISIONS_TOTAL: &str = "custos_authz_decisions_total";

/// Cache lookups by cache and hit/miss.
pub const CACHE_LOOKUPS_TOTAL: &str = "custos_authz_cache_lookups_total";

/// Remote queries by kind and result.
pub const QUERIES_TOTAL: &str = "custos_authz_queries_total";

pub(crate) fn record_decision(outcome: &'static str, state: &'static str) {
    counter!(DECISIONS_TOTAL, "outcome" => outcome, "state" => state).increment(1);
}

pub(crate) fn record_cache_lookup(cache: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(CACHE_LOOKUPS_TOTAL, "cache" => cache, "result" => result).increment(1);
}

pub(crate) fn record_query(kind: &'static str, result: &'static str) {
    counter!(QUERIES_TOTAL, "kind" => kind, "result" => result).increment(1);
}
