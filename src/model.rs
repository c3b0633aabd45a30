use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds of a wall-clock instant. Times of day are milliseconds since midnight.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Inclusive on both ends, used by the per-day reservation listing.
    pub fn starts_within(&self, from: Ms, to_inclusive: Ms) -> bool {
        from <= self.start && self.start <= to_inclusive
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    pub open_time: Ms,
    pub close_time: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_number: u32,
    pub capacity: u32,
}

impl Table {
    pub fn fits(&self, party_size: u32) -> bool {
        self.capacity >= party_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_id: Ulid,
    pub customer_id: Ulid,
    pub party_size: u32,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A table together with its reservations, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct TableState {
    pub table: Table,
    pub reservations: Vec<Reservation>,
}

impl TableState {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        id: Ulid,
        name: String,
        open_time: Ms,
        close_time: Ms,
    },
    TableCreated {
        id: Ulid,
        restaurant_id: Ulid,
        table_number: u32,
        capacity: u32,
    },
    CustomerCreated {
        id: Ulid,
        name: String,
        phone: String,
    },
    ReservationCreated {
        id: Ulid,
        restaurant_id: Ulid,
        table_id: Ulid,
        customer_id: Ulid,
        party_size: u32,
        span: Span,
        at: Ms,
    },
    ReservationUpdated {
        id: Ulid,
        restaurant_id: Ulid,
        table_id: Ulid,
        party_size: u32,
        span: Span,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        restaurant_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A reservation enriched with its table and customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetail {
    pub reservation: Reservation,
    pub table: Table,
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableTables {
    pub tables: Vec<Table>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchedule {
    pub table: Table,
    pub reservations: Vec<ReservationDetail>,
}

// ── Request types ────────────────────────────────────────────────
//
// Every field is optional so the engine, not the parser, decides what is missing.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRestaurant {
    pub id: Option<Ulid>,
    pub name: Option<String>,
    pub open_time: Option<Ms>,
    pub close_time: Option<Ms>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTable {
    pub id: Option<Ulid>,
    pub restaurant_id: Option<Ulid>,
    pub table_number: Option<u32>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCustomer {
    pub id: Option<Ulid>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Option<Ulid>,
    pub restaurant_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    pub party_size: Option<u32>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

/// Optional fields of a reservation update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationChanges {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub party_size: Option<u32>,
}
