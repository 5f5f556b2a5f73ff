//! Duration-based selection queries.
//!
//! Administrative tooling selects subsets of the population with compact
//! queries like `90m` or `2d`: "subs unreachable for more than this
//! long". The parsed predicate plugs into the herd's selection entry
//! points.

use chrono::{Duration, Utc};

use crate::error::SelectorParseError;
use crate::sub::Sub;

/// Parse `<integer><unit>` (unit in s, m, h, d) into a predicate matching
/// subs whose last successful contact is older than that, or that have
/// never been reached at all.
pub fn reachable_selector(
    query: &str,
) -> Result<impl Fn(&Sub) -> bool + Send + Sync, SelectorParseError> {
    if query.chars().count() < 2 {
        return Err(SelectorParseError::TooShort);
    }
    let Some((unit_start, unit)) = query.char_indices().last() else {
        return Err(SelectorParseError::TooShort);
    };
    let magnitude = &query[..unit_start];
    let unit_seconds: i64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        other => return Err(SelectorParseError::UnknownUnit(other)),
    };
    // Unsigned: a negative age is meaningless and must not parse.
    let magnitude: u64 = magnitude.parse()?;
    let seconds = i64::try_from(magnitude)
        .unwrap_or(i64::MAX)
        .saturating_mul(unit_seconds);
    let threshold = Duration::seconds(seconds);
    Ok(move |sub: &Sub| match sub.status().last_reachable {
        None => true,
        Some(at) => Utc::now() - at > threshold,
    })
}
