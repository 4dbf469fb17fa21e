use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use ulid::Ulid;

use crate::model::*;
use crate::time::{parse_date, parse_instant, parse_time_of_day};

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SelectAvailability {
        from: NaiveDate,
        to: NaiveDate,
    },
    InsertAppointment {
        start: Ms,
        notes: Option<String>,
        /// Admins may book on a customer's behalf.
        customer_id: Option<String>,
    },
    SelectAppointments {
        id: Option<Ulid>,
        filter: AppointmentFilter,
    },
    UpdateAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    InsertRule(NewRule),
    UpdateRule {
        id: Ulid,
        update: RuleUpdate,
    },
    DeleteRule {
        id: Ulid,
    },
    SelectRules,
    InsertBlockOut(NewBlockOut),
    UpdateBlockOut {
        id: Ulid,
        update: BlockOutUpdate,
    },
    DeleteBlockOut {
        id: Ulid,
    },
    SelectBlockOuts,
    UpsertCustomer(Customer),
    SelectCustomers {
        id: Option<String>,
    },
}

impl Command {
    /// Whether only admin sessions may run this command.
    pub fn admin_only(&self) -> bool {
        matches!(
            self,
            Command::InsertRule(_)
                | Command::UpdateRule { .. }
                | Command::DeleteRule { .. }
                | Command::SelectRules
                | Command::InsertBlockOut(_)
                | Command::UpdateBlockOut { .. }
                | Command::DeleteBlockOut { .. }
                | Command::SelectBlockOuts
        )
    }
}

const RULE_COLUMNS: &[&str] = &[
    "day_of_week",
    "start_time",
    "end_time",
    "slot_duration_minutes",
    "is_active",
];
const BLOCK_OUT_COLUMNS: &[&str] = &["start_time", "end_time", "reason"];
const APPOINTMENT_COLUMNS: &[&str] = &["start_time", "notes", "customer_id"];
const CUSTOMER_COLUMNS: &[&str] = &["id", "name", "email"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(SqlError::Empty);
    }
    if trimmed.to_uppercase().starts_with("UPDATE ") {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, trimmed).map_err(parse_error)?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_error(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = extract_insert_row(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "appointments" => {
            let row = named_row(&table, APPOINTMENT_COLUMNS, &columns, row)?;
            Ok(Command::InsertAppointment {
                start: required(&row, "start_time", parse_instant_expr)?,
                notes: optional(&row, "notes", parse_text_or_null)?.flatten(),
                customer_id: optional(&row, "customer_id", parse_text_or_null)?.flatten(),
            })
        }
        "availability_rules" => {
            let row = named_row(&table, RULE_COLUMNS, &columns, row)?;
            Ok(Command::InsertRule(NewRule {
                day_of_week: required(&row, "day_of_week", parse_weekday)?,
                start_time: required(&row, "start_time", parse_time_expr)?,
                end_time: required(&row, "end_time", parse_time_expr)?,
                slot_duration_minutes: required(&row, "slot_duration_minutes", parse_i64_expr)?,
                is_active: optional(&row, "is_active", parse_bool)?.unwrap_or(true),
            }))
        }
        "block_outs" => {
            let row = named_row(&table, BLOCK_OUT_COLUMNS, &columns, row)?;
            Ok(Command::InsertBlockOut(NewBlockOut {
                start: required(&row, "start_time", parse_instant_expr)?,
                end: required(&row, "end_time", parse_instant_expr)?,
                reason: optional(&row, "reason", parse_text_or_null)?.flatten(),
            }))
        }
        "customers" => {
            let row = named_row(&table, CUSTOMER_COLUMNS, &columns, row)?;
            Ok(Command::UpsertCustomer(Customer {
                id: required(&row, "id", parse_text)?,
                name: optional(&row, "name", parse_text_or_null)?.flatten(),
                email: optional(&row, "email", parse_text_or_null)?.flatten(),
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair each value with its column: the explicit column list when given,
/// otherwise the table's columns in order.
fn named_row<'a>(
    table: &str,
    known: &[&str],
    columns: &[String],
    values: &'a [Expr],
) -> Result<Vec<(String, &'a Expr)>, SqlError> {
    let names: Vec<String> = if columns.is_empty() {
        if values.len() > known.len() {
            return Err(SqlError::WrongArity(known.len(), values.len()));
        }
        known.iter().map(|c| c.to_string()).collect()
    } else {
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity(columns.len(), values.len()));
        }
        if let Some(bad) = columns.iter().find(|c| !known.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table.to_string(), bad.clone()));
        }
        columns.to_vec()
    };
    Ok(names.into_iter().zip(values.iter()).collect())
}

fn lookup<'a>(row: &[(String, &'a Expr)], column: &str) -> Option<&'a Expr> {
    row.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
}

fn required<T>(
    row: &[(String, &Expr)],
    column: &'static str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<T, SqlError> {
    let expr = lookup(row, column).ok_or(SqlError::MissingColumn(column))?;
    parse(expr).map_err(|e| e.in_column(column))
}

fn optional<T>(
    row: &[(String, &Expr)],
    column: &'static str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    lookup(row, column)
        .map(|expr| parse(expr).map_err(|e| e.in_column(column)))
        .transpose()
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_error)?;
    parser.expect_keyword(Keyword::UPDATE).map_err(parse_error)?;
    let name = parser.parse_object_name(false).map_err(parse_error)?;
    let table = object_name_last(&name).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    parser.expect_keyword(Keyword::SET).map_err(parse_error)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_error)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_error)?)
    } else {
        None
    };
    if parser.peek_token().token != Token::EOF {
        return Err(SqlError::Unsupported("trailing clauses after UPDATE ... WHERE".into()));
    }

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in &assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }

    let id = extract_where_id(&selection)?;
    match table.as_str() {
        "appointments" => {
            only_columns(&table, &set, &["status"])?;
            Ok(Command::UpdateAppointmentStatus {
                id,
                status: required(&set, "status", parse_status)?,
            })
        }
        "availability_rules" => {
            only_columns(&table, &set, RULE_COLUMNS)?;
            Ok(Command::UpdateRule {
                id,
                update: RuleUpdate {
                    day_of_week: optional(&set, "day_of_week", parse_weekday)?,
                    start_time: optional(&set, "start_time", parse_time_expr)?,
                    end_time: optional(&set, "end_time", parse_time_expr)?,
                    slot_duration_minutes: optional(&set, "slot_duration_minutes", parse_i64_expr)?,
                    is_active: optional(&set, "is_active", parse_bool)?,
                },
            })
        }
        "block_outs" => {
            only_columns(&table, &set, BLOCK_OUT_COLUMNS)?;
            Ok(Command::UpdateBlockOut {
                id,
                update: BlockOutUpdate {
                    start: optional(&set, "start_time", parse_instant_expr)?,
                    end: optional(&set, "end_time", parse_instant_expr)?,
                    reason: optional(&set, "reason", parse_text_or_null)?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn only_columns(table: &str, set: &[(String, &Expr)], allowed: &[&str]) -> Result<(), SqlError> {
    match set.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
        Some((c, _)) => Err(SqlError::UnknownColumn(table.to_string(), c.clone())),
        None => Ok(()),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "availability_rules" => Ok(Command::DeleteRule { id }),
        "block_outs" => Ok(Command::DeleteBlockOut { id }),
        "appointments" | "customers" => Err(SqlError::Unsupported(format!(
            "DELETE FROM {table}; use UPDATE to change status"
        ))),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut predicates = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut predicates)?;
    }

    match table.as_str() {
        "availability" => {
            let mut start_date = None;
            let mut end_date = None;
            for (column, op, value) in &predicates {
                match (column.as_str(), op) {
                    ("start_date", BinaryOperator::Eq) => start_date = Some(parse_date_expr(value)?),
                    ("end_date", BinaryOperator::Eq) => end_date = Some(parse_date_expr(value)?),
                    _ => return Err(unsupported_filter(&table, column, op)),
                }
            }
            Ok(Command::SelectAvailability {
                from: start_date.ok_or(SqlError::MissingFilter("start_date"))?,
                to: end_date.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        "appointments" => {
            let mut id = None;
            let mut filter = AppointmentFilter::default();
            for (column, op, value) in &predicates {
                match (column.as_str(), op) {
                    ("id", BinaryOperator::Eq) => id = Some(parse_ulid_expr(value)?),
                    ("status", BinaryOperator::Eq) => filter.status = Some(parse_status(value)?),
                    ("customer_id", BinaryOperator::Eq) => {
                        filter.customer_id = Some(parse_text(value)?)
                    }
                    ("start_time", BinaryOperator::GtEq) => filter.from = Some(parse_date_expr(value)?),
                    ("start_time", BinaryOperator::LtEq) => filter.to = Some(parse_date_expr(value)?),
                    _ => return Err(unsupported_filter(&table, column, op)),
                }
            }
            Ok(Command::SelectAppointments { id, filter })
        }
        "availability_rules" | "block_outs" => {
            if let Some((column, op, _)) = predicates.first() {
                return Err(unsupported_filter(&table, column, op));
            }
            Ok(if table == "block_outs" {
                Command::SelectBlockOuts
            } else {
                Command::SelectRules
            })
        }
        "customers" => {
            let mut id = None;
            for (column, op, value) in &predicates {
                match (column.as_str(), op) {
                    ("id", BinaryOperator::Eq) => id = Some(parse_text(value)?),
                    _ => return Err(unsupported_filter(&table, column, op)),
                }
            }
            Ok(Command::SelectCustomers { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a AND b AND ...` of `column <op> literal` comparisons.
fn collect_predicates<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn unsupported_filter(table: &str, column: &str, op: &BinaryOperator) -> SqlError {
    SqlError::Unsupported(format!("filter {column} {op} on {table}"))
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

/// The single VALUES row of an INSERT.
fn extract_insert_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.as_slice()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
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

/// String or number literal as text. NULL is `None`.
fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or_else(|| SqlError::InvalidValue("must not be NULL".into()))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::InvalidValue(format!("bad id '{s}': {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|_| SqlError::InvalidValue(format!("expected integer, got '{s}'")))
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::InvalidValue(format!("day_of_week {v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::InvalidValue(format!("expected bool, got {expr}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    parse_text(expr)?.parse().map_err(SqlError::InvalidValue)
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_text(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    parse_time_of_day(&parse_text(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_instant_expr(expr: &Expr) -> Result<Ms, SqlError> {
    parse_instant(&parse_text(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the domain rejects.
    InvalidValue(String),
}

impl SqlError {
    fn in_column(self, column: &str) -> SqlError {
        match self {
            SqlError::InvalidValue(msg) => SqlError::InvalidValue(format!("{column}: {msg}")),
            SqlError::Parse(msg) => SqlError::Parse(format!("{column}: {msg}")),
            other => other,
        }
    }

    /// Bad values and missing filters are the caller's data, not the
    /// statement's shape.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            SqlError::InvalidValue(_) | SqlError::MissingFilter(_) | SqlError::MissingColumn(_)
        )
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} on {t}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(c) => write!(f, "missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::anchor;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn select_availability() {
        let sql = "SELECT * FROM availability WHERE start_date = '2024-01-01' AND end_date = '2024-01-07'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                from: date(2024, 1, 1),
                to: date(2024, 1, 7),
            }
        );
    }

    #[test]
    fn availability_needs_both_dates() {
        let sql = "SELECT * FROM availability WHERE start_date = '2024-01-01'";
        let err = parse_sql(sql).unwrap_err();
        assert_eq!(err, SqlError::MissingFilter("end_date"));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn availability_rejects_bad_date() {
        let sql = "SELECT * FROM availability WHERE start_date = '' AND end_date = '2024-01-07'";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::InvalidValue(_)), "{err:?}");
        let sql = "SELECT * FROM availability WHERE start_date = '2024-13-01' AND end_date = '2024-01-07'";
        assert!(parse_sql(sql).unwrap_err().is_invalid_input());
    }

    #[test]
    fn insert_appointment_with_columns() {
        let sql = "INSERT INTO appointments (start_time, notes) VALUES ('2024-01-01T09:00:00Z', 'first visit');";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertAppointment {
                start: anchor(date(2024, 1, 1), hm(9, 0)),
                notes: Some("first visit".into()),
                customer_id: None,
            }
        );
    }

    #[test]
    fn insert_appointment_positional() {
        let sql = "INSERT INTO appointments VALUES ('2024-01-01T10:00:00+01:00')";
        match parse_sql(sql).unwrap() {
            Command::InsertAppointment { start, notes, .. } => {
                assert_eq!(start, anchor(date(2024, 1, 1), hm(9, 0)));
                assert_eq!(notes, None);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn insert_appointment_requires_start() {
        let sql = "INSERT INTO appointments (notes) VALUES ('hi')";
        assert_eq!(parse_sql(sql).unwrap_err(), SqlError::MissingColumn("start_time"));
        let sql = "INSERT INTO appointments (start_time) VALUES ('tomorrow')";
        assert!(matches!(parse_sql(sql).unwrap_err(), SqlError::InvalidValue(m) if m.starts_with("start_time")));
    }

    #[test]
    fn insert_rule() {
        let sql = "INSERT INTO availability_rules (day_of_week, start_time, end_time, slot_duration_minutes) VALUES (1, '09:00', '17:00', 30)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertRule(NewRule {
                day_of_week: 1,
                start_time: hm(9, 0),
                end_time: hm(17, 0),
                slot_duration_minutes: 30,
                is_active: true,
            })
        );
    }

    #[test]
    fn insert_rule_negative_weekday_rejected() {
        let sql = "INSERT INTO availability_rules VALUES (-1, '09:00', '17:00', 30, false)";
        assert!(matches!(parse_sql(sql).unwrap_err(), SqlError::InvalidValue(_)));
    }

    #[test]
    fn insert_rule_unknown_column() {
        let sql = "INSERT INTO availability_rules (weekday) VALUES (1)";
        assert_eq!(
            parse_sql(sql).unwrap_err(),
            SqlError::UnknownColumn("availability_rules".into(), "weekday".into())
        );
    }

    #[test]
    fn insert_block_out_and_customer() {
        let sql = "INSERT INTO block_outs (start_time, end_time, reason) VALUES ('2024-01-01T09:15:00Z', '2024-01-01T09:45:00Z', NULL)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBlockOut(NewBlockOut {
                start: anchor(date(2024, 1, 1), hm(9, 15)),
                end: anchor(date(2024, 1, 1), hm(9, 45)),
                reason: None,
            })
        );

        let sql = "INSERT INTO customers VALUES ('alice', 'Alice', 'alice@example.com')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpsertCustomer(Customer {
                id: "alice".into(),
                name: Some("Alice".into()),
                email: Some("alice@example.com".into()),
            })
        );
    }

    #[test]
    fn update_appointment_status() {
        let sql = format!("UPDATE appointments SET status = 'cancelled_by_customer' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateAppointmentStatus {
                id: Ulid::from_string(ID).unwrap(),
                status: AppointmentStatus::CancelledByCustomer,
            }
        );
    }

    #[test]
    fn update_with_invalid_status_lists_allowed() {
        let sql = format!("UPDATE appointments SET status = 'done' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap_err() {
            SqlError::InvalidValue(msg) => assert!(msg.contains("cancelled_by_admin"), "{msg}"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn update_requires_id_filter() {
        let sql = "UPDATE appointments SET status = 'paid'";
        assert_eq!(parse_sql(sql).unwrap_err(), SqlError::MissingFilter("id"));
    }

    #[test]
    fn update_rule_partial() {
        let sql = format!("UPDATE availability_rules SET is_active = false, slot_duration_minutes = 45 WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRule {
                id: Ulid::from_string(ID).unwrap(),
                update: RuleUpdate {
                    slot_duration_minutes: Some(45),
                    is_active: Some(false),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn update_block_out_clears_reason() {
        let sql = format!("UPDATE block_outs SET reason = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBlockOut { update, .. } => {
                assert_eq!(update.reason, Some(None));
                assert!(update.start.is_none());
            }
            other => panic!("expected UpdateBlockOut, got {other:?}"),
        }
    }

    #[test]
    fn delete_rule_and_block_out() {
        let sql = format!("DELETE FROM availability_rules WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteRule { .. }));
        let sql = format!("DELETE FROM block_outs WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBlockOut { .. }));
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap_err(), SqlError::Unsupported(_)));
    }

    #[test]
    fn select_appointments_filters() {
        let sql = "SELECT * FROM appointments WHERE status = 'confirmed' AND customer_id = 'alice' \
                   AND start_time >= '2024-01-01' AND start_time <= '2024-01-31'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAppointments {
                id: None,
                filter: AppointmentFilter {
                    status: Some(AppointmentStatus::Confirmed),
                    from: Some(date(2024, 1, 1)),
                    to: Some(date(2024, 1, 31)),
                    customer_id: Some("alice".into()),
                },
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM appointments").unwrap(),
            Command::SelectAppointments {
                id: None,
                filter: AppointmentFilter::default(),
            }
        );
    }

    #[test]
    fn select_unsupported_filter() {
        let sql = "SELECT * FROM appointments WHERE notes = 'x'";
        assert!(matches!(parse_sql(sql).unwrap_err(), SqlError::Unsupported(_)));
        let sql = "SELECT * FROM availability_rules WHERE day_of_week = 1";
        assert!(matches!(parse_sql(sql).unwrap_err(), SqlError::Unsupported(_)));
    }

    #[test]
    fn admin_only_commands() {
        assert!(parse_sql("SELECT * FROM availability_rules").unwrap().admin_only());
        assert!(parse_sql("SELECT * FROM block_outs").unwrap().admin_only());
        assert!(!parse_sql("SELECT * FROM appointments").unwrap().admin_only());
    }

    #[test]
    fn unknown_table_and_empty() {
        assert!(matches!(
            parse_sql("SELECT * FROM rooms").unwrap_err(),
            SqlError::UnknownTable(t) if t == "rooms"
        ));
        assert_eq!(parse_sql("  ; ").unwrap_err(), SqlError::Empty);
        assert!(matches!(parse_sql("SELEC 1").unwrap_err(), SqlError::Parse(_)));
    }
}
