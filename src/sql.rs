use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertService {
        id: Ulid,
        name: Option<String>,
        duration_ms: Ms,
        buffer_before_ms: Ms,
        buffer_after_ms: Ms,
        home_visit: bool,
        max_concurrent: u32,
    },
    SetServiceActive {
        id: Ulid,
        active: bool,
    },
    DeleteService {
        id: Ulid,
    },
    InsertStaff {
        id: Ulid,
        name: Option<String>,
    },
    SetStaffActive {
        id: Ulid,
        active: bool,
    },
    DeleteStaff {
        id: Ulid,
    },
    InsertStaffHours {
        staff_id: Ulid,
        weekday: u8,
        range: DayRange,
    },
    DeleteStaffHours {
        staff_id: Ulid,
        weekday: u8,
    },
    InsertTimeOff {
        id: Ulid,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteTimeOff {
        id: Ulid,
    },
    InsertBusinessHours {
        weekday: u8,
        range: DayRange,
    },
    DeleteBusinessHours {
        weekday: u8,
    },
    InsertServiceArea {
        id: Ulid,
        name: Option<String>,
        center: GeoPoint,
        radius_km: f64,
        base_surcharge: Cents,
        per_km_surcharge: Cents,
    },
    DeleteServiceArea {
        id: Ulid,
    },
    InsertSettings {
        slot_granularity_ms: Ms,
        travel_speed_kmh: f64,
    },
    InsertBooking {
        id: Ulid,
        service_id: Ulid,
        staff_id: Option<Ulid>,
        start: Ms,
        location: Option<GeoPoint>,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectAvailability {
        service_id: Ulid,
        day: NaiveDate,
        staff_id: Option<Ulid>,
        location: Option<GeoPoint>,
    },
    SelectBookings {
        filter: BookingsFilter,
    },
    SelectServices,
    SelectStaff,
    SelectAreas,
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug, PartialEq)]
pub enum BookingsFilter {
    Staff(Ulid),
    Service(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.trim_end_matches(';').trim() == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "services" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("services", 3, values.len()));
            }
            Ok(Command::InsertService {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                duration_ms: parse_i64(&values[2])?,
                buffer_before_ms: if values.len() >= 4 { parse_i64(&values[3])? } else { 0 },
                buffer_after_ms: if values.len() >= 5 { parse_i64(&values[4])? } else { 0 },
                home_visit: if values.len() >= 6 { parse_bool(&values[5])? } else { false },
                max_concurrent: if values.len() >= 7 { parse_u32(&values[6])? } else { 1 },
            })
        }
        "staff" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("staff", 1, 0));
            }
            Ok(Command::InsertStaff {
                id: parse_ulid(&values[0])?,
                name: if values.len() >= 2 { parse_string_or_null(&values[1])? } else { None },
            })
        }
        "staff_hours" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("staff_hours", 4, values.len()));
            }
            Ok(Command::InsertStaffHours {
                staff_id: parse_ulid(&values[0])?,
                weekday: parse_u8(&values[1])?,
                range: DayRange {
                    open_min: parse_u16(&values[2])?,
                    close_min: parse_u16(&values[3])?,
                },
            })
        }
        "time_off" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("time_off", 4, values.len()));
            }
            Ok(Command::InsertTimeOff {
                id: parse_ulid(&values[0])?,
                staff_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            })
        }
        "business_hours" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("business_hours", 3, values.len()));
            }
            Ok(Command::InsertBusinessHours {
                weekday: parse_u8(&values[0])?,
                range: DayRange {
                    open_min: parse_u16(&values[1])?,
                    close_min: parse_u16(&values[2])?,
                },
            })
        }
        "service_areas" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("service_areas", 7, values.len()));
            }
            Ok(Command::InsertServiceArea {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                center: GeoPoint {
                    lat: parse_f64(&values[2])?,
                    lng: parse_f64(&values[3])?,
                },
                radius_km: parse_f64(&values[4])?,
                base_surcharge: parse_i64(&values[5])?,
                per_km_surcharge: parse_i64(&values[6])?,
            })
        }
        "settings" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("settings", 2, values.len()));
            }
            Ok(Command::InsertSettings {
                slot_granularity_ms: parse_i64(&values[0])?,
                travel_speed_kmh: parse_f64(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let lat = if values.len() >= 5 { parse_f64_or_null(&values[4])? } else { None };
            let lng = if values.len() >= 6 { parse_f64_or_null(&values[5])? } else { None };
            let location = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                (None, None) => None,
                _ => return Err(SqlError::Parse("lat and lng must be given together".into())),
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
                staff_id: parse_ulid_or_null(&values[2])?,
                start: parse_i64(&values[3])?,
                location,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_eq_filters(&delete.selection)?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService { id: required_ulid(&filters, "id")? }),
        "staff" => Ok(Command::DeleteStaff { id: required_ulid(&filters, "id")? }),
        "time_off" => Ok(Command::DeleteTimeOff { id: required_ulid(&filters, "id")? }),
        "service_areas" => Ok(Command::DeleteServiceArea { id: required_ulid(&filters, "id")? }),
        "bookings" => Ok(Command::DeleteBooking { id: required_ulid(&filters, "id")? }),
        "business_hours" => Ok(Command::DeleteBusinessHours {
            weekday: required_u8(&filters, "weekday")?,
        }),
        "staff_hours" => Ok(Command::DeleteStaffHours {
            staff_id: required_ulid(&filters, "staff_id")?,
            weekday: required_u8(&filters, "weekday")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let filters = collect_eq_filters(selection)?;
    let id = required_ulid(&filters, "id")?;

    let Some(assignment) = assignments.first() else {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    };
    let column = assignment_column(assignment)
        .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;

    match (table.as_str(), column.as_str()) {
        ("bookings", "status") => {
            let status = parse_string(&assignment.value)?;
            let status = BookingStatus::parse(&status)
                .ok_or_else(|| SqlError::Parse(format!("unknown status: {status}")))?;
            Ok(Command::SetBookingStatus { id, status })
        }
        ("services", "active") => Ok(Command::SetServiceActive {
            id,
            active: parse_bool(&assignment.value)?,
        }),
        ("staff", "active") => Ok(Command::SetStaffActive {
            id,
            active: parse_bool(&assignment.value)?,
        }),
        ("bookings", col) | ("services", col) | ("staff", col) => {
            Err(SqlError::Unsupported(format!("UPDATE column: {col}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_eq_filters(&select.selection)?;

    match table.as_str() {
        "availability" => {
            let service_id = required_ulid(&filters, "service_id")?;
            let day = required_date(&filters, "day")?;
            let staff_id = optional_ulid(&filters, "staff_id")?;
            let lat = optional_f64(&filters, "lat")?;
            let lng = optional_f64(&filters, "lng")?;
            let location = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                (None, None) => None,
                _ => return Err(SqlError::Parse("lat and lng must be given together".into())),
            };
            Ok(Command::SelectAvailability { service_id, day, staff_id, location })
        }
        "bookings" => {
            if let Some(staff_id) = optional_ulid(&filters, "staff_id")? {
                Ok(Command::SelectBookings { filter: BookingsFilter::Staff(staff_id) })
            } else if let Some(service_id) = optional_ulid(&filters, "service_id")? {
                Ok(Command::SelectBookings { filter: BookingsFilter::Service(service_id) })
            } else {
                Err(SqlError::MissingFilter("staff_id or service_id"))
            }
        }
        "services" => Ok(Command::SelectServices),
        "staff" => Ok(Command::SelectStaff),
        "service_areas" => Ok(Command::SelectAreas),
        _ => Err(SqlError::UnknownTable(table)),
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

/// Flatten an AND-joined WHERE clause into (column, value) equality pairs.
fn collect_eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters_rec(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters_rec(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters_rec(left, out)?;
            collect_eq_filters_rec(right, out)?;
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse("expected column on left of =".into()))?;
            out.push((col, (**right).clone()));
        }
        Expr::Nested(inner) => collect_eq_filters_rec(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("WHERE clause: {other}"))),
    }
    Ok(())
}

fn find_filter<'a>(filters: &'a [(String, Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| e)
}

fn required_ulid(filters: &[(String, Expr)], col: &'static str) -> Result<Ulid, SqlError> {
    find_filter(filters, col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_ulid_expr)
}

fn optional_ulid(filters: &[(String, Expr)], col: &str) -> Result<Option<Ulid>, SqlError> {
    find_filter(filters, col).map(parse_ulid_expr).transpose()
}

fn required_u8(filters: &[(String, Expr)], col: &'static str) -> Result<u8, SqlError> {
    find_filter(filters, col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_u8)
}

fn required_date(filters: &[(String, Expr)], col: &'static str) -> Result<NaiveDate, SqlError> {
    let expr = find_filter(filters, col).ok_or(SqlError::MissingFilter(col))?;
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn optional_f64(filters: &[(String, Expr)], col: &str) -> Result<Option<f64>, SqlError> {
    find_filter(filters, col).map(parse_f64).transpose()
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad f64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad f64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64_or_null(expr: &Expr) -> Result<Option<f64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_f64(expr)?))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?,
            )),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Ok(s.clone())
    } else {
        Err(SqlError::Parse(format!("expected string, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_string(expr)?))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
