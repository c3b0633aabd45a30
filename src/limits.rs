use crate::model::Ms;
use crate::time::DAY_MS;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_RESTAURANTS_PER_TENANT: usize = 10_000;
pub const MAX_TABLES_PER_RESTAURANT: usize = 1_000;
pub const MAX_RESERVATIONS_PER_TABLE: usize = 100_000;
pub const MAX_CUSTOMERS_PER_TENANT: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_PARTY_SIZE: u32 = 1_000;

/// 1970-01-01 through 9999-12-31.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single reservation may not run longer than a day.
pub const MAX_SPAN_DURATION_MS: Ms = DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * DAY_MS;
