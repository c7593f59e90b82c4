use tracing::trace;

// Every helper records into the global `metrics` recorder (the Prometheus
// exporter installed in `run`) and mirrors the event at trace level.

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("marketbot_requests_total", "route" => route).increment(1);
    trace!(
        target = "marketbot.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    ::metrics::histogram!("marketbot_resolve_stage_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "marketbot.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn scrape_attempt(marketplace: &'static str, attempt: u32, outcome: &'static str) {
    ::metrics::counter!(
        "marketbot_scrape_attempts_total",
        "marketplace" => marketplace,
        "outcome" => outcome
    )
    .increment(1);
    trace!(
        target = "marketbot.metrics",
        marketplace = marketplace,
        attempt = attempt,
        outcome = outcome,
        "scrape_attempt"
    );
}

pub fn wizard_transition(from: &'static str, to: &'static str) {
    ::metrics::counter!("marketbot_wizard_transitions_total", "from" => from, "to" => to)
        .increment(1);
    trace!(
        target = "marketbot.metrics",
        from = from,
        to = to,
        "wizard_transition"
    );
}

pub fn order_status_changed(status: &'static str) {
    ::metrics::counter!("marketbot_order_status_changes_total", "status" => status).increment(1);
    trace!(
        target = "marketbot.metrics",
        status = status,
        "order_status_changed"
    );
}
