use infrastructure::meter::{add, increment, set};

const AREA: &str = "area";
const OUTCOME: &str = "outcome";
const REASON: &str = "reason";

pub fn poll_completed(area: &str, outcome: &str) {
    increment("powercut_poll", &[(AREA, area), (OUTCOME, outcome)]);
}

pub fn outages_current(area: &str, count: usize) {
    set("powercut_outages", count as f64, &[(AREA, area)]);
}

pub fn records_dropped(area: &str, count: usize) {
    add("powercut_records_dropped", count as u64, &[(AREA, area), (REASON, "missing_reference")]);
}

pub fn fields_defaulted(area: &str, count: usize) {
    add("powercut_fields_defaulted", count as u64, &[(AREA, area)]);
}

pub fn ha_push_failed(area: &str, operation: &str) {
    increment("powercut_homeassistant_error", &[(AREA, area), ("operation", operation)]);
}
