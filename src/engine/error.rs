use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    MissingFields(&'static str),
    RestaurantNotFound(Ulid),
    ReservationNotFound(Ulid),
    TableNotFound(Ulid),
    CustomerNotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicatePhone(String),
    DuplicateTableNumber(u32),
    OutsideOperatingHours,
    NoSuitableCapacity(u32),
    FullyBooked,
    NoAvailableTable,
    AlreadyStarted(Ulid),
    MissingDate,
    MissingRange,
    InvalidTimeRange,
    InvalidOperatingHours,
    InvalidCapacity,
    InvalidPartySize,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Status class of the failure: 400 business rule, 404 lookup miss,
    /// 409 uniqueness, 500 persistence.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::RestaurantNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::TableNotFound(_)
            | EngineError::CustomerNotFound(_) => 404,
            EngineError::AlreadyExists(_)
            | EngineError::DuplicatePhone(_)
            | EngineError::DuplicateTableNumber(_) => 409,
            EngineError::WalError(_) => 500,
            _ => 400,
        }
    }

    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::MissingFields(_)
            | EngineError::MissingDate
            | EngineError::MissingRange
            | EngineError::InvalidTimeRange
            | EngineError::InvalidOperatingHours
            | EngineError::InvalidCapacity
            | EngineError::InvalidPartySize => "22023",
            EngineError::RestaurantNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::TableNotFound(_)
            | EngineError::CustomerNotFound(_) => "P0002",
            EngineError::AlreadyExists(_)
            | EngineError::DuplicatePhone(_)
            | EngineError::DuplicateTableNumber(_) => "23505",
            EngineError::WalError(_) => "XX000",
            _ => "P0001",
        }
    }

    /// Message safe to hand to a client. Persistence detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::WalError(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingFields(_) => "missing_fields",
            EngineError::RestaurantNotFound(_) => "restaurant_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::TableNotFound(_) => "table_not_found",
            EngineError::CustomerNotFound(_) => "customer_not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::DuplicatePhone(_) => "duplicate_phone",
            EngineError::DuplicateTableNumber(_) => "duplicate_table_number",
            EngineError::OutsideOperatingHours => "outside_operating_hours",
            EngineError::NoSuitableCapacity(_) => "no_suitable_capacity",
            EngineError::FullyBooked => "fully_booked",
            EngineError::NoAvailableTable => "no_available_table",
            EngineError::AlreadyStarted(_) => "already_started",
            EngineError::MissingDate => "missing_date",
            EngineError::MissingRange => "missing_range",
            EngineError::InvalidTimeRange => "invalid_time_range",
            EngineError::InvalidOperatingHours => "invalid_operating_hours",
            EngineError::InvalidCapacity => "invalid_capacity",
            EngineError::InvalidPartySize => "invalid_party_size",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "persistence_failure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingFields(field) => write!(f, "missing required fields: {field}"),
            EngineError::RestaurantNotFound(id) => write!(f, "restaurant not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::TableNotFound(id) => write!(f, "table not found: {id}"),
            EngineError::CustomerNotFound(id) => write!(f, "customer not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicatePhone(phone) => {
                write!(f, "customer with phone {phone} already exists")
            }
            EngineError::DuplicateTableNumber(n) => {
                write!(f, "table number {n} already exists for this restaurant")
            }
            EngineError::OutsideOperatingHours => write!(f, "reservation outside operating hours"),
            EngineError::NoSuitableCapacity(party) => {
                write!(f, "no table can accommodate a party of {party}")
            }
            EngineError::FullyBooked => write!(f, "restaurant fully booked for this time slot"),
            EngineError::NoAvailableTable => {
                write!(f, "no available tables for the selected time")
            }
            EngineError::AlreadyStarted(id) => {
                write!(f, "cannot update reservation {id}: it has already started")
            }
            EngineError::MissingDate => write!(f, "missing date (expected YYYY-MM-DD)"),
            EngineError::MissingRange => write!(f, "missing start_time or end_time"),
            EngineError::InvalidTimeRange => write!(f, "start_time must be before end_time"),
            EngineError::InvalidOperatingHours => {
                write!(f, "open_time must be before close_time")
            }
            EngineError::InvalidCapacity => write!(f, "capacity must be positive"),
            EngineError::InvalidPartySize => write!(f, "party_size must be positive"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(EngineError::MissingFields("name").status_code(), 400);
        assert_eq!(EngineError::FullyBooked.status_code(), 400);
        assert_eq!(EngineError::AlreadyStarted(Ulid::nil()).status_code(), 400);
        assert_eq!(EngineError::ReservationNotFound(Ulid::nil()).status_code(), 404);
        assert_eq!(EngineError::DuplicatePhone("555".into()).status_code(), 409);
        assert_eq!(EngineError::WalError("disk".into()).status_code(), 500);
    }

    #[test]
    fn persistence_detail_not_leaked() {
        let e = EngineError::WalError("/var/lib/covers/t.wal: EIO".into());
        assert_eq!(e.client_message(), "internal error");
        assert_eq!(e.sqlstate(), "XX000");
        assert!(EngineError::FullyBooked.client_message().contains("fully booked"));
    }
}
