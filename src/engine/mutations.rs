use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::DAY_MS;

use super::assign::{
    assign_smallest_fit, check_operating_hours, ensure_table_room, first_available, validate_span,
};
use super::{Engine, EngineError, RestaurantState, SharedRestaurantState, WalCommand};

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, EngineError> {
    value.ok_or(EngineError::MissingFields(field))
}

fn required_text(value: Option<String>, field: &'static str, max_len: usize) -> Result<String, EngineError> {
    let text = required(value, field)?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(EngineError::MissingFields(field));
    }
    if text.len() > max_len {
        return Err(EngineError::LimitExceeded("value too long"));
    }
    Ok(text)
}

fn record_failure(err: &EngineError) {
    metrics::counter!(crate::observability::ASSIGNMENT_FAILURES_TOTAL, "reason" => err.kind())
        .increment(1);
}

impl Engine {
    pub async fn create_restaurant(&self, req: NewRestaurant) -> Result<Restaurant, EngineError> {
        let name = required_text(req.name, "name", MAX_NAME_LEN)?;
        let open_time = required(req.open_time, "open_time")?;
        let close_time = required(req.close_time, "close_time")?;
        let within_day = |t: Ms| (0..DAY_MS).contains(&t);
        if !within_day(open_time) || !within_day(close_time) || open_time >= close_time {
            return Err(EngineError::InvalidOperatingHours);
        }
        let id = req.id.unwrap_or_else(Ulid::new);

        let _registry = self.registry_lock.lock().await;
        if self.restaurants.len() >= MAX_RESTAURANTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        if self.restaurants.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RestaurantCreated {
            id,
            name: name.clone(),
            open_time,
            close_time,
        };
        self.wal_append(&event).await?;
        let restaurant = Restaurant {
            id,
            name,
            open_time,
            close_time,
        };
        self.restaurants.insert(
            id,
            Arc::new(RwLock::new(RestaurantState::new(restaurant.clone()))),
        );
        Ok(restaurant)
    }

    pub async fn create_table(&self, req: NewTable) -> Result<Table, EngineError> {
        let restaurant_id = required(req.restaurant_id, "restaurant_id")?;
        let table_number = required(req.table_number, "table_number")?;
        let capacity = required(req.capacity, "capacity")?;
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity);
        }
        if capacity > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        let id = req.id.unwrap_or_else(Ulid::new);

        let rs = self.restaurant_write_target(&restaurant_id)?;
        let mut guard = rs.write().await;
        if guard.tables.len() >= MAX_TABLES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many tables in restaurant"));
        }
        if self.entity_to_restaurant.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.has_table_number(table_number) {
            return Err(EngineError::DuplicateTableNumber(table_number));
        }

        let event = Event::TableCreated {
            id,
            restaurant_id,
            table_number,
            capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Table {
            id,
            restaurant_id,
            table_number,
            capacity,
        })
    }

    pub async fn create_customer(&self, req: NewCustomer) -> Result<Customer, EngineError> {
        let name = required_text(req.name, "name", MAX_NAME_LEN)?;
        let phone = required_text(req.phone, "phone", MAX_PHONE_LEN)?;
        let id = req.id.unwrap_or_else(Ulid::new);

        // Check-then-write must be atomic for the phone uniqueness guarantee.
        let _registry = self.registry_lock.lock().await;
        if self.customers.len() >= MAX_CUSTOMERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many customers"));
        }
        if self.customers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.phones.contains_key(&phone) {
            return Err(EngineError::DuplicatePhone(phone));
        }

        let event = Event::CustomerCreated {
            id,
            name: name.clone(),
            phone: phone.clone(),
        };
        self.wal_append(&event).await?;
        let customer = Customer { id, name, phone };
        self.insert_customer(customer.clone());
        Ok(customer)
    }

    /// Book the smallest free table that fits the party.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let restaurant_id = required(req.restaurant_id, "restaurant_id")?;
        let customer_id = required(req.customer_id, "customer_id")?;
        let party_size = required(req.party_size.filter(|&n| n > 0), "party_size")?;
        let start = required(req.start, "start_time")?;
        let end = required(req.end, "end_time")?;
        if party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party too large"));
        }
        let span = Span { start, end };
        validate_span(&span)?;
        let id = req.id.unwrap_or_else(Ulid::new);

        let rs = self.restaurant_write_target(&restaurant_id)?;
        if !self.customers.contains_key(&customer_id) {
            return Err(EngineError::CustomerNotFound(customer_id));
        }
        let mut guard = rs.write().await;
        check_operating_hours(&guard.restaurant, &span)?;
        if self.entity_to_restaurant.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let table = match assign_smallest_fit(&guard, party_size, &span) {
            Ok(table) => table.clone(),
            Err(e) => {
                debug!(restaurant = %restaurant_id, party_size, "assignment failed: {e}");
                record_failure(&e);
                return Err(e);
            }
        };
        ensure_table_room(&guard, &table.id)?;

        let now = self.now();
        let event = Event::ReservationCreated {
            id,
            restaurant_id,
            table_id: table.id,
            customer_id,
            party_size,
            span,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_ASSIGNED_TOTAL, "path" => "create")
            .increment(1);
        debug!(reservation = %id, table = %table.id, capacity = table.capacity, "reservation assigned");

        Ok(Reservation {
            id,
            restaurant_id,
            table_id: table.id,
            customer_id,
            party_size,
            span,
            created_at: now,
            updated_at: now,
        })
    }

    /// Move a reservation to new times and/or party size, re-running the table
    /// search in catalog order. Fails without touching anything if the
    /// reservation has already started or no table is free.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        changes: ReservationChanges,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;

        let now = self.now();
        if current.span.start < now {
            return Err(EngineError::AlreadyStarted(id));
        }

        let party_size = match changes.party_size {
            Some(0) => return Err(EngineError::InvalidPartySize),
            Some(n) if n > MAX_PARTY_SIZE => return Err(EngineError::LimitExceeded("party too large")),
            Some(n) => n,
            None => current.party_size,
        };
        let span = Span {
            start: changes.start.unwrap_or(current.span.start),
            end: changes.end.unwrap_or(current.span.end),
        };
        validate_span(&span)?;

        let table = match first_available(&guard, party_size, &span, id) {
            Ok(table) => table.clone(),
            Err(e) => {
                debug!(reservation = %id, party_size, "re-assignment failed: {e}");
                record_failure(&e);
                return Err(e);
            }
        };
        if table.id != current.table_id {
            ensure_table_room(&guard, &table.id)?;
            info!(reservation = %id, from = %current.table_id, to = %table.id, "reservation moved");
        }

        let event = Event::ReservationUpdated {
            id,
            restaurant_id: current.restaurant_id,
            table_id: table.id,
            party_size,
            span,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_ASSIGNED_TOTAL, "path" => "update")
            .increment(1);

        Ok(Reservation {
            table_id: table.id,
            party_size,
            span,
            updated_at: now,
            ..current
        })
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        let event = Event::ReservationCancelled {
            id,
            restaurant_id: current.restaurant_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(current)
    }

    fn restaurant_write_target(&self, id: &Ulid) -> Result<SharedRestaurantState, EngineError> {
        self.get_restaurant_state(id)
            .ok_or(EngineError::RestaurantNotFound(*id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held across the snapshot and the swap so no append lands in between.
        let _registry = self.registry_lock.lock().await;

        let mut ids: Vec<Ulid> = self.restaurants.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(rs) = self.get_restaurant_state(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut customers: Vec<Customer> = self.customers.iter().map(|e| e.value().clone()).collect();
        customers.sort_by_key(|c| c.id);

        let mut events = Vec::new();
        for c in customers {
            events.push(Event::CustomerCreated {
                id: c.id,
                name: c.name,
                phone: c.phone,
            });
        }
        for guard in &guards {
            let r = &guard.restaurant;
            events.push(Event::RestaurantCreated {
                id: r.id,
                name: r.name.clone(),
                open_time: r.open_time,
                close_time: r.close_time,
            });
            for ts in &guard.tables {
                events.push(Event::TableCreated {
                    id: ts.table.id,
                    restaurant_id: r.id,
                    table_number: ts.table.table_number,
                    capacity: ts.table.capacity,
                });
            }
            for res in guard.reservations() {
                events.push(Event::ReservationCreated {
                    id: res.id,
                    restaurant_id: r.id,
                    table_id: res.table_id,
                    customer_id: res.customer_id,
                    party_size: res.party_size,
                    span: res.span,
                    at: res.created_at,
                });
                if res.updated_at != res.created_at {
                    events.push(Event::ReservationUpdated {
                        id: res.id,
                        restaurant_id: r.id,
                        table_id: res.table_id,
                        party_size: res.party_size,
                        span: res.span,
                        at: res.updated_at,
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
