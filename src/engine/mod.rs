mod assign;
mod catalog;
mod clock;
mod error;
mod mutations;
mod queries;

pub use assign::{assign_smallest_fit, available_tables, first_available};
pub use catalog::RestaurantState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRestaurantState = Arc<RwLock<RestaurantState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub(super) restaurants: DashMap<Ulid, SharedRestaurantState>,
    pub(super) customers: DashMap<Ulid, Customer>,
    /// Phone → customer id, the uniqueness index.
    pub(super) phones: DashMap<String, Ulid>,
    /// Reverse lookup: table/reservation id → restaurant id.
    pub(super) entity_to_restaurant: DashMap<Ulid, Ulid>,
    /// Serialises restaurant and customer creation; compaction holds it too.
    pub(super) registry_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
}

/// Apply a table or reservation event to its restaurant (caller holds the lock).
fn apply_to_restaurant(rs: &mut RestaurantState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::TableCreated {
            id,
            restaurant_id,
            table_number,
            capacity,
        } => {
            rs.add_table(Table {
                id: *id,
                restaurant_id: *restaurant_id,
                table_number: *table_number,
                capacity: *capacity,
            });
            entity_map.insert(*id, *restaurant_id);
        }
        Event::ReservationCreated {
            id,
            restaurant_id,
            table_id,
            customer_id,
            party_size,
            span,
            at,
        } => {
            let inserted = rs.insert_reservation(Reservation {
                id: *id,
                restaurant_id: *restaurant_id,
                table_id: *table_id,
                customer_id: *customer_id,
                party_size: *party_size,
                span: *span,
                created_at: *at,
                updated_at: *at,
            });
            if inserted {
                entity_map.insert(*id, *restaurant_id);
            }
        }
        Event::ReservationUpdated {
            id,
            table_id,
            party_size,
            span,
            at,
            ..
        } => {
            if let Some(old) = rs.remove_reservation(id) {
                rs.insert_reservation(Reservation {
                    table_id: *table_id,
                    party_size: *party_size,
                    span: *span,
                    updated_at: *at,
                    ..old
                });
            }
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(id);
            entity_map.remove(id);
        }
        // Restaurants and customers live at the map level, not here
        Event::RestaurantCreated { .. } | Event::CustomerCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_clock(wal_path, Arc::new(SystemClock))
    }

    pub fn with_clock(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            restaurants: DashMap::new(),
            customers: DashMap::new(),
            phones: DashMap::new(),
            entity_to_restaurant: DashMap::new(),
            registry_lock: Mutex::new(()),
            wal_tx,
            clock,
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!("replayed {} events from {}", events.len(), wal_path.display());

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RestaurantCreated {
                id,
                name,
                open_time,
                close_time,
            } => {
                let rs = RestaurantState::new(Restaurant {
                    id: *id,
                    name: name.clone(),
                    open_time: *open_time,
                    close_time: *close_time,
                });
                self.restaurants.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::CustomerCreated { id, name, phone } => {
                self.insert_customer(Customer {
                    id: *id,
                    name: name.clone(),
                    phone: phone.clone(),
                });
            }
            other => {
                let Some(restaurant_id) = event_restaurant_id(other) else {
                    return;
                };
                let Some(entry) = self.get_restaurant_state(&restaurant_id) else {
                    tracing::warn!("replay: event for unknown restaurant {restaurant_id}");
                    return;
                };
                match entry.try_write() {
                    Ok(mut guard) => apply_to_restaurant(&mut guard, other, &self.entity_to_restaurant),
                    Err(_) => tracing::error!("replay: restaurant {restaurant_id} unexpectedly locked"),
                }
            }
        }
    }

    pub(super) fn insert_customer(&self, customer: Customer) {
        self.phones.insert(customer.phone.clone(), customer.id);
        self.customers.insert(customer.id, customer);
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_restaurant_state(&self, id: &Ulid) -> Option<SharedRestaurantState> {
        self.restaurants.get(id).map(|e| e.value().clone())
    }

    pub fn get_restaurant_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_restaurant.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply, in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RestaurantState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_restaurant(rs, event, &self.entity_to_restaurant);
        Ok(())
    }

    /// Lookup reservation → restaurant, acquire the restaurant's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RestaurantState>, EngineError> {
        let not_found = || EngineError::ReservationNotFound(*reservation_id);
        let restaurant_id = self
            .get_restaurant_for_entity(reservation_id)
            .ok_or_else(not_found)?;
        let rs = self.get_restaurant_state(&restaurant_id).ok_or_else(not_found)?;
        let guard = rs.write_owned().await;
        // Cancelled while we waited for the lock
        if guard.reservation(reservation_id).is_none() {
            return Err(not_found());
        }
        Ok(guard)
    }
}

/// The restaurant an event belongs to (table and reservation events only).
fn event_restaurant_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TableCreated { restaurant_id, .. }
        | Event::ReservationCreated { restaurant_id, .. }
        | Event::ReservationUpdated { restaurant_id, .. }
        | Event::ReservationCancelled { restaurant_id, .. } => Some(*restaurant_id),
        Event::RestaurantCreated { .. } | Event::CustomerCreated { .. } => None,
    }
}
