use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::error;

use crate::auth::CoversAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError, Verb};
use crate::tenant::TenantManager;
use crate::time::{format_time_of_day, format_timestamp};

pub struct CoversHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CoversQueryParser>,
}

impl CoversHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CoversQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRestaurant(req) => {
                let restaurant = engine.create_restaurant(req).await.map_err(engine_err)?;
                restaurant_rows(vec![restaurant])
            }
            Command::InsertTable(req) => {
                let table = engine.create_table(req).await.map_err(engine_err)?;
                table_rows(vec![table])
            }
            Command::InsertCustomer(req) => {
                let customer = engine.create_customer(req).await.map_err(engine_err)?;
                customer_rows(vec![customer])
            }
            Command::InsertReservation(req) => {
                let reservation = engine.create_reservation(req).await.map_err(engine_err)?;
                let detail = enrich(engine, reservation).await?;
                reservation_rows(vec![detail])
            }
            Command::UpdateReservation { id, changes } => {
                let reservation = engine
                    .update_reservation(id, changes)
                    .await
                    .map_err(engine_err)?;
                let detail = enrich(engine, reservation).await?;
                reservation_rows(vec![detail])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRestaurants { id: Some(id) } => {
                let restaurant = engine.get_restaurant(id).await.map_err(engine_err)?;
                restaurant_rows(vec![restaurant])
            }
            Command::SelectRestaurants { id: None } => {
                restaurant_rows(engine.list_restaurants().await)
            }
            Command::SelectTables { restaurant_id } => {
                table_rows(engine.list_tables(restaurant_id).await.map_err(engine_err)?)
            }
            Command::SelectTable { id } => {
                table_rows(vec![engine.get_table(id).await.map_err(engine_err)?])
            }
            Command::SelectCustomers { id: Some(id) } => {
                customer_rows(vec![engine.get_customer(id).map_err(engine_err)?])
            }
            Command::SelectCustomers { id: None } => customer_rows(engine.list_customers()),
            Command::SelectReservation { id } => {
                reservation_rows(vec![engine.get_reservation(id).await.map_err(engine_err)?])
            }
            Command::SelectReservationsForDate {
                restaurant_id,
                date,
            } => reservation_rows(
                engine
                    .reservations_for_date(restaurant_id, date)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::SelectSchedule {
                restaurant_id,
                date,
            } => schedule_rows(
                engine
                    .restaurant_schedule(restaurant_id, date)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::SelectAvailableTables {
                restaurant_id,
                start,
                end,
                party_size,
            } => {
                // The row count in the command tag is the availability count.
                let available = engine
                    .list_available(restaurant_id, start, end, party_size)
                    .await
                    .map_err(engine_err)?;
                table_rows(available.tables)
            }
        }
    }
}

/// Attach table and customer to a freshly written reservation. Tables and
/// customers are never deleted, so both lookups succeed for a valid reservation.
async fn enrich(engine: &Engine, reservation: Reservation) -> PgWireResult<ReservationDetail> {
    let table = engine
        .get_table(reservation.table_id)
        .await
        .map_err(engine_err)?;
    let customer = engine.get_customer(reservation.customer_id).ok();
    Ok(ReservationDetail {
        reservation,
        table,
        customer,
    })
}

// ── Row schemas ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn restaurant_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("open_time", Type::VARCHAR),
        field("close_time", Type::VARCHAR),
    ]
}

fn table_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("restaurant_id", Type::VARCHAR),
        field("table_number", Type::INT4),
        field("capacity", Type::INT4),
    ]
}

fn customer_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("restaurant_id", Type::VARCHAR),
        field("table_id", Type::VARCHAR),
        field("table_number", Type::INT4),
        field("customer_id", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("party_size", Type::INT4),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
        field("updated_at", Type::VARCHAR),
    ]
}

/// One row per reservation; a table without reservations gets one row with NULLs.
fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("table_id", Type::VARCHAR),
        field("table_number", Type::INT4),
        field("capacity", Type::INT4),
        field("reservation_id", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("party_size", Type::INT4),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
    ]
}

/// Result columns for a statement, known before its parameters are bound.
fn result_schema(sql_text: &str) -> Vec<FieldInfo> {
    let Some((verb, table)) = sql::statement_target(sql_text) else {
        return vec![];
    };
    match (verb, table.as_str()) {
        (Verb::Delete, _) => vec![],
        (_, "restaurants") => restaurant_schema(),
        (_, "tables" | "available_tables") => table_schema(),
        (_, "customers") => customer_schema(),
        (_, "reservations") => reservation_schema(),
        (Verb::Select, "schedule") => schedule_schema(),
        _ => vec![],
    }
}

fn small_int(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn query_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> PgWireResult<Response> {
    Ok(Response::Query(QueryResponse::new(
        Arc::new(schema),
        stream::iter(rows),
    )))
}

fn encode_rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let shared = Arc::new(schema.clone());
    let rows = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(shared.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn restaurant_rows(restaurants: Vec<Restaurant>) -> PgWireResult<Response> {
    encode_rows(restaurant_schema(), restaurants, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.name)?;
        enc.encode_field(&format_time_of_day(r.open_time))?;
        enc.encode_field(&format_time_of_day(r.close_time))
    })
}

fn table_rows(tables: Vec<Table>) -> PgWireResult<Response> {
    encode_rows(table_schema(), tables, |enc, t| {
        enc.encode_field(&t.id.to_string())?;
        enc.encode_field(&t.restaurant_id.to_string())?;
        enc.encode_field(&small_int(t.table_number))?;
        enc.encode_field(&small_int(t.capacity))
    })
}

fn customer_rows(customers: Vec<Customer>) -> PgWireResult<Response> {
    encode_rows(customer_schema(), customers, |enc, c| {
        enc.encode_field(&c.id.to_string())?;
        enc.encode_field(&c.name)?;
        enc.encode_field(&c.phone)
    })
}

fn reservation_rows(details: Vec<ReservationDetail>) -> PgWireResult<Response> {
    encode_rows(reservation_schema(), details, |enc, d| {
        let r = &d.reservation;
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.restaurant_id.to_string())?;
        enc.encode_field(&r.table_id.to_string())?;
        enc.encode_field(&small_int(d.table.table_number))?;
        enc.encode_field(&r.customer_id.to_string())?;
        enc.encode_field(&d.customer.as_ref().map(|c| c.name.clone()))?;
        enc.encode_field(&d.customer.as_ref().map(|c| c.phone.clone()))?;
        enc.encode_field(&small_int(r.party_size))?;
        enc.encode_field(&format_timestamp(r.span.start))?;
        enc.encode_field(&format_timestamp(r.span.end))?;
        enc.encode_field(&format_timestamp(r.created_at))?;
        enc.encode_field(&format_timestamp(r.updated_at))
    })
}

fn schedule_rows(schedule: Vec<TableSchedule>) -> PgWireResult<Response> {
    // Flatten to (table, Option<reservation>) so empty tables still show up.
    let mut flat: Vec<(Table, Option<ReservationDetail>)> = Vec::new();
    for entry in schedule {
        if entry.reservations.is_empty() {
            flat.push((entry.table, None));
        } else {
            for d in entry.reservations {
                flat.push((entry.table.clone(), Some(d)));
            }
        }
    }
    encode_rows(schedule_schema(), flat, |enc, (t, d)| {
        enc.encode_field(&t.id.to_string())?;
        enc.encode_field(&small_int(t.table_number))?;
        enc.encode_field(&small_int(t.capacity))?;
        let r = d.as_ref().map(|d| &d.reservation);
        let customer = d.as_ref().and_then(|d| d.customer.as_ref());
        enc.encode_field(&r.map(|r| r.id.to_string()))?;
        enc.encode_field(&customer.map(|c| c.name.clone()))?;
        enc.encode_field(&customer.map(|c| c.phone.clone()))?;
        enc.encode_field(&r.map(|r| small_int(r.party_size)))?;
        enc.encode_field(&r.map(|r| format_timestamp(r.span.start)))?;
        enc.encode_field(&r.map(|r| format_timestamp(r.span.end)))
    })
}

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql_text = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql_text).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql_text: &str) -> usize {
    let bytes = sql_text.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql_text[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters (text format) as quoted literals.
/// One pass over the statement: placeholders inside string literals and
/// text coming from a bound value are never rewritten.
fn substitute_params<B: AsRef<[u8]>>(statement: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(statement.len());
    let mut in_literal = false;
    let mut chars = statement.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            // `''` inside a literal toggles twice, which keeps us inside it.
            in_literal = !in_literal;
            result.push(c);
            continue;
        }
        if c != '$' || in_literal {
            result.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let bound = statement[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match bound {
            Some(Some(bytes)) => {
                result.push('\'');
                result.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&statement[i..digits_end]),
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CoversAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(CoversHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                CoversAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CoversFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(detail) = &e {
        error!("persistence failure: {detail}");
    }
    user_error(e.sqlstate(), e.client_message())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
