use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder installed at
// startup only serves the /metrics endpoint.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "salon_gbp.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "salon_gbp.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn task_outcome(kind: &'static str, outcome: &'static str) {
    trace!(
        target = "salon_gbp.metrics",
        kind = kind,
        outcome = outcome,
        "task_outcome_inc"
    );
}

pub fn retry_scheduled(kind: &'static str, countdown_secs: u64) {
    trace!(
        target = "salon_gbp.metrics",
        kind = kind,
        countdown_secs = countdown_secs,
        "task_retry_scheduled"
    );
}

pub fn items_ingested(source: &'static str, found: usize, created: usize) {
    trace!(
        target = "salon_gbp.metrics",
        source = source,
        found = found as u64,
        created = created as u64,
        "items_ingested"
    );
}
