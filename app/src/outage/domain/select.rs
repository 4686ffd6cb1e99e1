use crate::core::time::DateTime;

use super::Event;

pub fn count<'a>(events: impl IntoIterator<Item = &'a Event>) -> usize {
    events.into_iter().count()
}

/// Headline event: most recent start, then most recent estimated restoration, then the
/// greatest reference. Known timestamps always rank above missing ones. References are
/// unique, so the order is total and the result does not depend on iteration order.
pub fn select_latest<'a>(events: impl IntoIterator<Item = &'a Event>) -> Option<&'a Event> {
    events.into_iter().max_by(|a, b| recency(a).cmp(&recency(b)))
}

fn recency(event: &Event) -> (Option<DateTime>, Option<DateTime>, &str) {
    (event.start_time, event.estimated_restoration, &event.reference)
}
