use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::day_bounds;

use super::assign::available_tables;
use super::{Engine, EngineError, RestaurantState};

impl Engine {
    pub async fn get_restaurant(&self, id: Ulid) -> Result<Restaurant, EngineError> {
        let rs = self
            .get_restaurant_state(&id)
            .ok_or(EngineError::RestaurantNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.restaurant.clone())
    }

    pub async fn list_restaurants(&self) -> Vec<Restaurant> {
        let states: Vec<_> = self.restaurants.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for rs in states {
            out.push(rs.read().await.restaurant.clone());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Tables in catalog order.
    pub async fn list_tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::RestaurantNotFound(restaurant_id))?;
        let guard = rs.read().await;
        Ok(guard.tables.iter().map(|ts| ts.table.clone()).collect())
    }

    pub async fn get_table(&self, id: Ulid) -> Result<Table, EngineError> {
        let not_found = || EngineError::TableNotFound(id);
        let restaurant_id = self.get_restaurant_for_entity(&id).ok_or_else(not_found)?;
        let rs = self.get_restaurant_state(&restaurant_id).ok_or_else(not_found)?;
        let guard = rs.read().await;
        guard.table(&id).map(|ts| ts.table.clone()).ok_or_else(not_found)
    }

    pub fn get_customer(&self, id: Ulid) -> Result<Customer, EngineError> {
        self.customers
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::CustomerNotFound(id))
    }

    pub fn list_customers(&self) -> Vec<Customer> {
        let mut out: Vec<Customer> = self.customers.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationDetail, EngineError> {
        let not_found = || EngineError::ReservationNotFound(id);
        let restaurant_id = self.get_restaurant_for_entity(&id).ok_or_else(not_found)?;
        let rs = self.get_restaurant_state(&restaurant_id).ok_or_else(not_found)?;
        let guard = rs.read().await;
        let reservation = guard.reservation(&id).ok_or_else(not_found)?;
        self.detail(&guard, reservation).ok_or_else(not_found)
    }

    /// Reservations starting on the given day (midnight ms), earliest first.
    pub async fn reservations_for_date(
        &self,
        restaurant_id: Ulid,
        date: Option<Ms>,
    ) -> Result<Vec<ReservationDetail>, EngineError> {
        let date = date.ok_or(EngineError::MissingDate)?;
        let Some(rs) = self.get_restaurant_state(&restaurant_id) else {
            return Ok(vec![]);
        };
        let (from, to) = day_bounds(date);
        let guard = rs.read().await;

        let mut hits: Vec<&Reservation> = guard
            .reservations()
            .filter(|r| r.span.starts_within(from, to))
            .collect();
        hits.sort_by_key(|r| (r.span.start, r.id));
        Ok(hits
            .into_iter()
            .filter_map(|r| self.detail(&guard, r))
            .collect())
    }

    /// Tables with no reservation overlapping `[start, end)`, in catalog order.
    pub async fn list_available(
        &self,
        restaurant_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        min_party_size: Option<u32>,
    ) -> Result<AvailableTables, EngineError> {
        let (Some(start), Some(end)) = (start, end) else {
            return Err(EngineError::MissingRange);
        };
        let span = Span { start, end };
        if span.start >= span.end {
            return Err(EngineError::InvalidTimeRange);
        }
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let Some(rs) = self.get_restaurant_state(&restaurant_id) else {
            return Ok(AvailableTables {
                tables: vec![],
                count: 0,
            });
        };
        let guard = rs.read().await;
        let tables = available_tables(&guard, &span, min_party_size);
        let count = tables.len();
        Ok(AvailableTables { tables, count })
    }

    /// Every table of the restaurant with its reservations, optionally limited to one day.
    pub async fn restaurant_schedule(
        &self,
        restaurant_id: Ulid,
        date: Option<Ms>,
    ) -> Result<Vec<TableSchedule>, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::RestaurantNotFound(restaurant_id))?;
        let bounds = date.map(day_bounds);
        let guard = rs.read().await;

        Ok(guard
            .tables
            .iter()
            .map(|ts| TableSchedule {
                table: ts.table.clone(),
                reservations: ts
                    .reservations
                    .iter()
                    .filter(|r| bounds.is_none_or(|(from, to)| r.span.starts_within(from, to)))
                    .map(|r| ReservationDetail {
                        reservation: r.clone(),
                        table: ts.table.clone(),
                        customer: self.customers.get(&r.customer_id).map(|c| c.value().clone()),
                    })
                    .collect(),
            })
            .collect())
    }

    fn detail(&self, rs: &RestaurantState, reservation: &Reservation) -> Option<ReservationDetail> {
        let table = rs.table(&reservation.table_id)?.table.clone();
        Some(ReservationDetail {
            reservation: reservation.clone(),
            table,
            customer: self
                .customers
                .get(&reservation.customer_id)
                .map(|c| c.value().clone()),
        })
    }
}
