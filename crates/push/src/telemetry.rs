//! Call and error counters, compiled out without the `metrics` feature.

use crate::ErrorKind;

#[cfg(feature = "metrics")]
pub(crate) fn record_call(op: &'static str) {
    metrics::counter!("courier_push_calls_total", "op" => op).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_call(_op: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn record_error(op: &'static str, kind: ErrorKind) {
    metrics::counter!(
        "courier_push_errors_total",
        "op" => op,
        "kind" => kind.as_str()
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_error(_op: &'static str, _kind: ErrorKind) {}

#[cfg(feature = "metrics")]
pub(crate) fn record_revoke_failure() {
    metrics::counter!("courier_push_revoke_failures_total").increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_revoke_failure() {}
