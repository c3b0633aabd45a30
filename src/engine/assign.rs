use ulid::Ulid;

use crate::model::*;
use crate::time::hour_of_day;

use super::catalog::RestaurantState;
use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidTimeRange);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// Hour-of-day check only: minutes and seconds of either bound are not compared.
pub(crate) fn check_operating_hours(restaurant: &Restaurant, span: &Span) -> Result<(), EngineError> {
    let (open_hour, close_hour) = (
        hour_of_day(restaurant.open_time),
        hour_of_day(restaurant.close_time),
    );
    if hour_of_day(span.start) < open_hour || hour_of_day(span.end) > close_hour {
        return Err(EngineError::OutsideOperatingHours);
    }
    Ok(())
}

/// Refuse to grow a table's booking list past `MAX_RESERVATIONS_PER_TABLE`.
pub(crate) fn ensure_table_room(rs: &RestaurantState, table_id: &Ulid) -> Result<(), EngineError> {
    if rs
        .table(table_id)
        .is_some_and(|ts| ts.reservations.len() >= crate::limits::MAX_RESERVATIONS_PER_TABLE)
    {
        return Err(EngineError::LimitExceeded("too many reservations on table"));
    }
    Ok(())
}

/// Smallest-fit assignment for new reservations.
///
/// Candidates are scanned smallest capacity first (ties by table number); the
/// first one without a conflicting reservation wins.
pub fn assign_smallest_fit<'a>(
    rs: &'a RestaurantState,
    party_size: u32,
    span: &Span,
) -> Result<&'a Table, EngineError> {
    let candidates = rs.suitable_tables_by_capacity(party_size);
    if candidates.is_empty() {
        return Err(EngineError::NoSuitableCapacity(party_size));
    }
    for table in candidates {
        if rs.has_conflict(&table.id, span, None) {
            tracing::debug!(table = %table.id, capacity = table.capacity, "candidate busy");
            continue;
        }
        return Ok(table);
    }
    Err(EngineError::FullyBooked)
}

/// Re-assignment for updated reservations.
///
/// Scans in catalog order rather than by capacity, so the first free table
/// that fits wins even when a smaller one is free.
pub fn first_available<'a>(
    rs: &'a RestaurantState,
    party_size: u32,
    span: &Span,
    exclude: Ulid,
) -> Result<&'a Table, EngineError> {
    rs.suitable_tables(party_size)
        .find(|t| !rs.has_conflict(&t.id, span, Some(exclude)))
        .ok_or(EngineError::NoAvailableTable)
}

/// Tables free for the whole span, in catalog order.
pub fn available_tables(rs: &RestaurantState, span: &Span, min_party_size: Option<u32>) -> Vec<Table> {
    rs.suitable_tables(min_party_size.unwrap_or(0))
        .filter(|t| !rs.has_conflict(&t.id, span, None))
        .cloned()
        .collect()
}
