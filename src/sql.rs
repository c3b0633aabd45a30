use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::time::{parse_date, parse_time_of_day, parse_timestamp};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRestaurant(NewRestaurant),
    InsertTable(NewTable),
    InsertCustomer(NewCustomer),
    InsertReservation(NewReservation),
    UpdateReservation {
        id: Ulid,
        changes: ReservationChanges,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectRestaurants {
        id: Option<Ulid>,
    },
    SelectTables {
        restaurant_id: Ulid,
    },
    SelectTable {
        id: Ulid,
    },
    SelectCustomers {
        id: Option<Ulid>,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectReservationsForDate {
        restaurant_id: Ulid,
        date: Option<Ms>,
    },
    SelectSchedule {
        restaurant_id: Ulid,
        date: Option<Ms>,
    },
    SelectAvailableTables {
        restaurant_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        party_size: Option<u32>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column → value pairs of a single-row INSERT.
struct Row<'a>(Vec<(String, &'a Expr)>);

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn check_columns(&self, table: &'static str, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(table, c.clone())),
            None => Ok(()),
        }
    }

    fn ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(column).map(parse_ulid_or_null).transpose().map(Option::flatten)
    }

    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map(parse_text_or_null).transpose().map(Option::flatten)
    }

    fn u32(&self, column: &str) -> Result<Option<u32>, SqlError> {
        self.get(column).map(parse_u32_or_null).transpose().map(Option::flatten)
    }

    fn timestamp(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.get(column).map(parse_timestamp_or_null).transpose().map(Option::flatten)
    }

    fn time_of_day(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.get(column).map(parse_time_of_day_or_null).transpose().map(Option::flatten)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
    }
    let row = Row(
        insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(values.iter())
            .collect(),
    );

    match table.as_str() {
        "restaurants" => {
            row.check_columns("restaurants", &["id", "name", "open_time", "close_time"])?;
            Ok(Command::InsertRestaurant(NewRestaurant {
                id: row.ulid("id")?,
                name: row.text("name")?,
                open_time: row.time_of_day("open_time")?,
                close_time: row.time_of_day("close_time")?,
            }))
        }
        "tables" => {
            row.check_columns("tables", &["id", "restaurant_id", "table_number", "capacity"])?;
            Ok(Command::InsertTable(NewTable {
                id: row.ulid("id")?,
                restaurant_id: row.ulid("restaurant_id")?,
                table_number: row.u32("table_number")?,
                capacity: row.u32("capacity")?,
            }))
        }
        "customers" => {
            row.check_columns("customers", &["id", "name", "phone"])?;
            Ok(Command::InsertCustomer(NewCustomer {
                id: row.ulid("id")?,
                name: row.text("name")?,
                phone: row.text("phone")?,
            }))
        }
        "reservations" => {
            row.check_columns(
                "reservations",
                &["id", "restaurant_id", "customer_id", "party_size", "start_time", "end_time"],
            )?;
            Ok(Command::InsertReservation(NewReservation {
                id: row.ulid("id")?,
                restaurant_id: row.ulid("restaurant_id")?,
                customer_id: row.ulid("customer_id")?,
                party_size: row.u32("party_size")?,
                start: row.timestamp("start_time")?,
                end: row.timestamp("end_time")?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::Unsupported(format!("UPDATE of {table}")));
    }
    let id = extract_where_id(selection)?;

    let mut changes = ReservationChanges::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        match column.as_str() {
            "start_time" => changes.start = parse_timestamp_or_null(&assignment.value)?,
            "end_time" => changes.end = parse_timestamp_or_null(&assignment.value)?,
            "party_size" => changes.party_size = parse_u32_or_null(&assignment.value)?,
            _ => return Err(SqlError::UnknownColumn("reservations", column)),
        }
    }
    Ok(Command::UpdateReservation { id, changes })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation { id }),
        "restaurants" | "tables" | "customers" => {
            Err(SqlError::Unsupported(format!("DELETE from {table}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Conjuncts of a WHERE clause: `column <op> value` pairs joined by AND.
#[derive(Default)]
struct Filters<'a>(Vec<(String, BinaryOperator, &'a Expr)>);

impl<'a> Filters<'a> {
    fn collect(expr: &'a Expr, out: &mut Self) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                Self::collect(left, out)?;
                Self::collect(right, out)
            }
            Expr::BinaryOp { left, op, right } => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.0.push((column, op.clone(), right.as_ref()));
                Ok(())
            }
            Expr::Nested(inner) => Self::collect(inner, out),
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn find(&self, column: &str, op: BinaryOperator) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq_ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.find(column, BinaryOperator::Eq).map(parse_ulid_expr).transpose()
    }

    fn eq_date(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.find(column, BinaryOperator::Eq).map(parse_date_expr).transpose()
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        Filters::collect(selection, &mut filters)?;
    }

    match table.as_str() {
        "restaurants" => Ok(Command::SelectRestaurants {
            id: filters.eq_ulid("id")?,
        }),
        "customers" => Ok(Command::SelectCustomers {
            id: filters.eq_ulid("id")?,
        }),
        "tables" => match (filters.eq_ulid("id")?, filters.eq_ulid("restaurant_id")?) {
            (Some(id), _) => Ok(Command::SelectTable { id }),
            (None, Some(restaurant_id)) => Ok(Command::SelectTables { restaurant_id }),
            (None, None) => Err(SqlError::MissingFilter("restaurant_id")),
        },
        "reservations" => match (filters.eq_ulid("id")?, filters.eq_ulid("restaurant_id")?) {
            (Some(id), _) => Ok(Command::SelectReservation { id }),
            (None, Some(restaurant_id)) => Ok(Command::SelectReservationsForDate {
                restaurant_id,
                date: filters.eq_date("date")?,
            }),
            (None, None) => Err(SqlError::MissingFilter("restaurant_id")),
        },
        "schedule" => Ok(Command::SelectSchedule {
            restaurant_id: filters
                .eq_ulid("restaurant_id")?
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
            date: filters.eq_date("date")?,
        }),
        "available_tables" => Ok(Command::SelectAvailableTables {
            restaurant_id: filters
                .eq_ulid("restaurant_id")?
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
            start: filters
                .find("start_time", BinaryOperator::GtEq)
                .map(parse_timestamp_expr)
                .transpose()?,
            end: filters
                .find("end_time", BinaryOperator::LtEq)
                .map(parse_timestamp_expr)
                .transpose()?,
            party_size: filters
                .find("party_size", BinaryOperator::GtEq)
                .map(parse_u32_expr)
                .transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Statement shape ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Insert,
    Update,
    Delete,
    Select,
}

/// Verb and target table of a statement, without interpreting any values.
/// Prepared statements are described before their `$n` parameters are bound.
pub fn statement_target(sql: &str) -> Option<(Verb, String)> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => Some((Verb::Insert, insert_table_name(insert).ok()?)),
        Statement::Update { table, .. } => {
            Some((Verb::Update, table_factor_name(&table.relation).ok()?))
        }
        Statement::Delete(delete) => Some((Verb::Delete, delete_table_name(delete).ok()?)),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let from = select.from.first()?;
                Some((Verb::Select, table_factor_name(&from.relation).ok()?))
            }
            _ => None,
        },
        _ => None,
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection.as_ref() {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// `Ok(None)` for SQL NULL, otherwise the parsed value.
fn or_null<T>(expr: &Expr, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse(expr).map(Some) }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

/// ISO-8601 string or integer Unix milliseconds.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => parse_timestamp(s)
            .or_else(|| s.trim().parse().ok())
            .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}"))),
        _ => parse_i64_expr(expr),
    }
}

/// `'HH:MM'` / `'HH:MM:SS'`, or milliseconds since midnight.
fn parse_time_of_day_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_time_of_day(s).ok_or_else(|| SqlError::Parse(format!("bad time of day: {s}")))
        }
        _ => parse_i64_expr(expr),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<Ms, SqlError> {
    let s = parse_text_expr(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date (expected YYYY-MM-DD): {s}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    or_null(expr, parse_ulid_expr)
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    or_null(expr, parse_text_expr)
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    or_null(expr, parse_u32_expr)
}

fn parse_timestamp_or_null(expr: &Expr) -> Result<Option<Ms>, SqlError> {
    or_null(expr, parse_timestamp_expr)
}

fn parse_time_of_day_or_null(expr: &Expr) -> Result<Option<Ms>, SqlError> {
    or_null(expr, parse_time_of_day_expr)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(..) => "42703",
            SqlError::Unsupported(_) => "0A000",
            _ => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::WrongArity(columns, values) => {
                write!(f, "{columns} columns but {values} values")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{HOUR_MS as H, MINUTE_MS as M};

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_restaurant_with_times_of_day() {
        let sql = "INSERT INTO restaurants (name, open_time, close_time) VALUES ('Luigi''s', '09:00', '22:30:00')";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertRestaurant(NewRestaurant {
                id: None,
                name: Some("Luigi's".into()),
                open_time: Some(9 * H),
                close_time: Some(22 * H + 30 * M),
            })
        );
    }

    #[test]
    fn insert_table_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO tables (capacity, restaurant_id, table_number, id) VALUES (4, '{ID}', 12, '{OTHER}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertTable(t) => {
                assert_eq!(t.id, Some(ulid(OTHER)));
                assert_eq!(t.restaurant_id, Some(ulid(ID)));
                assert_eq!(t.table_number, Some(12));
                assert_eq!(t.capacity, Some(4));
            }
            other => panic!("expected InsertTable, got {other:?}"),
        }
    }

    #[test]
    fn insert_customer() {
        let sql = "INSERT INTO customers (name, phone) VALUES ('Ada', '555-0100')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertCustomer(NewCustomer {
                id: None,
                name: Some("Ada".into()),
                phone: Some("555-0100".into()),
            })
        );
    }

    #[test]
    fn insert_reservation_accepts_iso_and_millis() {
        let sql = format!(
            "INSERT INTO reservations (restaurant_id, customer_id, party_size, start_time, end_time) \
             VALUES ('{ID}', '{OTHER}', 2, '2030-01-15T12:00:00Z', 1894708800000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation(r) => {
                assert_eq!(r.party_size, Some(2));
                assert_eq!(r.start, parse_timestamp("2030-01-15T12:00:00"));
                assert_eq!(r.end, Some(1_894_708_800_000));
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_null_is_absent() {
        let sql = format!(
            "INSERT INTO reservations (restaurant_id, customer_id, party_size, start_time, end_time) \
             VALUES ('{ID}', '{OTHER}', NULL, '2030-01-15 12:00:00', '2030-01-15 14:00:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation(r) => assert_eq!(r.party_size, None),
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_rejects_unknown_column_and_arity() {
        let err = parse_sql("INSERT INTO customers (name, email) VALUES ('Ada', 'a@b')").unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn("customers", ref c) if c == "email"));
        let err = parse_sql("INSERT INTO customers (name, phone) VALUES ('Ada')").unwrap_err();
        assert!(matches!(err, SqlError::WrongArity(2, 1)));
        let err = parse_sql("INSERT INTO customers VALUES ('Ada', '1')").unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn update_reservation() {
        let sql = format!(
            "UPDATE reservations SET party_size = 5, end_time = '2030-01-15T15:00:00' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: ulid(ID),
                changes: ReservationChanges {
                    start: None,
                    end: parse_timestamp("2030-01-15T15:00:00"),
                    party_size: Some(5),
                },
            }
        );
    }

    #[test]
    fn update_requires_id_and_known_columns() {
        let err = parse_sql("UPDATE reservations SET party_size = 5").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("id")));
        let err = parse_sql(&format!("UPDATE reservations SET table_id = '{OTHER}' WHERE id = '{ID}'")).unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn(..)));
        let err = parse_sql(&format!("UPDATE tables SET capacity = 2 WHERE id = '{ID}'")).unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }

    #[test]
    fn delete_reservation() {
        let cmd = parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::DeleteReservation { id: ulid(ID) });
        assert!(parse_sql(&format!("DELETE FROM tables WHERE id = '{ID}'")).is_err());
    }

    #[test]
    fn select_reservations_for_date() {
        let sql = format!("SELECT * FROM reservations WHERE restaurant_id = '{ID}' AND date = '2030-01-15'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservationsForDate {
                restaurant_id: ulid(ID),
                date: parse_date("2030-01-15"),
            }
        );
        // the missing date is the engine's call
        let sql = format!("SELECT * FROM reservations WHERE restaurant_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservationsForDate {
                restaurant_id: ulid(ID),
                date: None,
            }
        );
    }

    #[test]
    fn select_by_id() {
        let cmd = parse_sql(&format!("SELECT * FROM reservations WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::SelectReservation { id: ulid(ID) });
        let cmd = parse_sql(&format!("SELECT * FROM tables WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::SelectTable { id: ulid(ID) });
        let cmd = parse_sql("SELECT * FROM restaurants").unwrap();
        assert_eq!(cmd, Command::SelectRestaurants { id: None });
    }

    #[test]
    fn select_available_tables() {
        let sql = format!(
            "SELECT * FROM available_tables WHERE restaurant_id = '{ID}' \
             AND start_time >= '2030-01-15T12:00:00' AND end_time <= '2030-01-15T14:00:00' AND party_size >= 4"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailableTables {
                restaurant_id: ulid(ID),
                start: parse_timestamp("2030-01-15T12:00:00"),
                end: parse_timestamp("2030-01-15T14:00:00"),
                party_size: Some(4),
            }
        );
    }

    #[test]
    fn select_schedule_without_date() {
        let cmd = parse_sql(&format!("SELECT * FROM schedule WHERE restaurant_id = '{ID}'")).unwrap();
        assert_eq!(
            cmd,
            Command::SelectSchedule {
                restaurant_id: ulid(ID),
                date: None,
            }
        );
    }

    #[test]
    fn bad_values_are_parse_errors() {
        let sql = "SELECT * FROM reservations WHERE restaurant_id = 'not-a-ulid' AND date = '2030-01-15'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = format!("SELECT * FROM schedule WHERE restaurant_id = '{ID}' AND date = '15/01/2030'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn statement_target_ignores_placeholders() {
        assert_eq!(
            statement_target("SELECT * FROM available_tables WHERE restaurant_id = $1 AND start_time >= $2"),
            Some((Verb::Select, "available_tables".to_string()))
        );
        assert_eq!(
            statement_target("UPDATE reservations SET party_size = $1 WHERE id = $2"),
            Some((Verb::Update, "reservations".to_string()))
        );
        assert_eq!(
            statement_target("INSERT INTO customers (name, phone) VALUES ($1, $2)"),
            Some((Verb::Insert, "customers".to_string()))
        );
        assert_eq!(statement_target("not sql"), None);
    }

    #[test]
    fn unknown_table_and_empty() {
        assert!(matches!(parse_sql("SELECT * FROM menus"), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert_eq!(SqlError::UnknownTable("x".into()).sqlstate(), "42P01");
    }
}
