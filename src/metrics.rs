use tracing::trace;

// Counters and timings emitted as trace events under `relister.metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "relister.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "relister.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn listing_outcome(status: &'static str, stage: Option<&'static str>) {
    trace!(
        target = "relister.metrics",
        status = status,
        stage = stage.unwrap_or("-"),
        "listing_outcome"
    );
}

pub fn violations_found(kind: &'static str, count: usize) {
    trace!(
        target = "relister.metrics",
        kind = kind,
        count = count as u64,
        "policy_violations"
    );
}
