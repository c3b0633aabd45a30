use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Everything that hangs off one restaurant. Guarded as a unit by the
/// restaurant's lock, so candidate scans and writes see the same state.
#[derive(Debug, Clone)]
pub struct RestaurantState {
    pub restaurant: Restaurant,
    /// Catalog order: the order tables were created in.
    pub tables: Vec<TableState>,
    /// Reservation id → table id.
    reservation_table: HashMap<Ulid, Ulid>,
}

impl RestaurantState {
    pub fn new(restaurant: Restaurant) -> Self {
        Self {
            restaurant,
            tables: Vec::new(),
            reservation_table: HashMap::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.restaurant.id
    }

    pub fn table(&self, id: &Ulid) -> Option<&TableState> {
        self.tables.iter().find(|t| t.table.id == *id)
    }

    fn table_mut(&mut self, id: &Ulid) -> Option<&mut TableState> {
        self.tables.iter_mut().find(|t| t.table.id == *id)
    }

    pub fn has_table_number(&self, table_number: u32) -> bool {
        self.tables.iter().any(|t| t.table.table_number == table_number)
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.push(TableState::new(table));
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        let table_id = self.reservation_table.get(id)?;
        self.table(table_id)?
            .reservations
            .iter()
            .find(|r| r.id == *id)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_table.len()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.tables.iter().flat_map(|t| t.reservations.iter())
    }

    /// Insert a reservation under its table. Returns false if the table is unknown.
    pub fn insert_reservation(&mut self, reservation: Reservation) -> bool {
        let (id, table_id) = (reservation.id, reservation.table_id);
        match self.table_mut(&table_id) {
            Some(ts) => {
                ts.insert_reservation(reservation);
                self.reservation_table.insert(id, table_id);
                true
            }
            None => false,
        }
    }

    pub fn remove_reservation(&mut self, id: &Ulid) -> Option<Reservation> {
        let table_id = self.reservation_table.remove(id)?;
        self.table_mut(&table_id)?.remove_reservation(*id)
    }

    // ── Table catalog ────────────────────────────────────────

    /// Tables with capacity ≥ `min_capacity`, in catalog order.
    pub fn suitable_tables(&self, min_capacity: u32) -> impl Iterator<Item = &Table> {
        self.tables
            .iter()
            .map(|t| &t.table)
            .filter(move |t| t.fits(min_capacity))
    }

    /// Tables with capacity ≥ `min_capacity`, smallest first, ties by table number.
    pub fn suitable_tables_by_capacity(&self, min_capacity: u32) -> Vec<&Table> {
        let mut tables: Vec<&Table> = self.suitable_tables(min_capacity).collect();
        tables.sort_by_key(|t| (t.capacity, t.table_number));
        tables
    }

    // ── Availability ─────────────────────────────────────────

    /// True if any reservation on the table other than `exclude` overlaps `span`.
    pub fn has_conflict(&self, table_id: &Ulid, span: &Span, exclude: Option<Ulid>) -> bool {
        self.table(table_id).is_some_and(|ts| {
            ts.overlapping(span)
                .any(|r| exclude != Some(r.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restaurant() -> RestaurantState {
        RestaurantState::new(Restaurant {
            id: Ulid::new(),
            name: "Test".into(),
            open_time: 0,
            close_time: 1,
        })
    }

    fn add_table(rs: &mut RestaurantState, table_number: u32, capacity: u32) -> Ulid {
        let id = Ulid::new();
        rs.add_table(Table {
            id,
            restaurant_id: rs.id(),
            table_number,
            capacity,
        });
        id
    }

    fn book(rs: &mut RestaurantState, table_id: Ulid, start: Ms, end: Ms) -> Ulid {
        let id = Ulid::new();
        assert!(rs.insert_reservation(Reservation {
            id,
            restaurant_id: rs.id(),
            table_id,
            customer_id: Ulid::new(),
            party_size: 2,
            span: Span::new(start, end),
            created_at: 0,
            updated_at: 0,
        }));
        id
    }

    #[test]
    fn suitable_tables_keep_catalog_order() {
        let mut rs = restaurant();
        let big = add_table(&mut rs, 1, 8);
        let _tiny = add_table(&mut rs, 2, 1);
        let small = add_table(&mut rs, 3, 2);

        let ids: Vec<Ulid> = rs.suitable_tables(2).map(|t| t.id).collect();
        assert_eq!(ids, vec![big, small]);
    }

    #[test]
    fn suitable_tables_by_capacity_breaks_ties_by_number() {
        let mut rs = restaurant();
        let eight = add_table(&mut rs, 1, 8);
        let four_b = add_table(&mut rs, 5, 4);
        let four_a = add_table(&mut rs, 2, 4);
        let _two = add_table(&mut rs, 3, 2);

        let ids: Vec<Ulid> = rs
            .suitable_tables_by_capacity(3)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![four_a, four_b, eight]);
    }

    #[test]
    fn conflict_detection_is_half_open() {
        let mut rs = restaurant();
        let t = add_table(&mut rs, 1, 4);
        book(&mut rs, t, 100, 200);

        assert!(rs.has_conflict(&t, &Span::new(150, 250), None));
        assert!(rs.has_conflict(&t, &Span::new(50, 101), None));
        assert!(!rs.has_conflict(&t, &Span::new(200, 300), None));
        assert!(!rs.has_conflict(&t, &Span::new(0, 100), None));
    }

    #[test]
    fn conflict_ignores_excluded_reservation() {
        let mut rs = restaurant();
        let t = add_table(&mut rs, 1, 4);
        let r = book(&mut rs, t, 100, 200);

        assert!(!rs.has_conflict(&t, &Span::new(150, 250), Some(r)));
        book(&mut rs, t, 200, 300);
        assert!(rs.has_conflict(&t, &Span::new(150, 250), Some(r)));
    }

    #[test]
    fn unknown_table_has_no_conflict() {
        let rs = restaurant();
        assert!(!rs.has_conflict(&Ulid::new(), &Span::new(0, 10), None));
    }

    #[test]
    fn reservation_index_follows_inserts_and_removes() {
        let mut rs = restaurant();
        let t = add_table(&mut rs, 1, 4);
        let r = book(&mut rs, t, 100, 200);
        assert_eq!(rs.reservation(&r).map(|r| r.table_id), Some(t));
        assert_eq!(rs.reservation_count(), 1);

        assert!(rs.remove_reservation(&r).is_some());
        assert!(rs.reservation(&r).is_none());
        assert!(rs.remove_reservation(&r).is_none());
        assert_eq!(rs.reservation_count(), 0);
    }

    #[test]
    fn insert_on_unknown_table_is_rejected() {
        let mut rs = restaurant();
        let ok = rs.insert_reservation(Reservation {
            id: Ulid::new(),
            restaurant_id: rs.id(),
            table_id: Ulid::new(),
            customer_id: Ulid::new(),
            party_size: 2,
            span: Span::new(0, 10),
            created_at: 0,
            updated_at: 0,
        });
        assert!(!ok);
        assert_eq!(rs.reservation_count(), 0);
    }
}
