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

use crate::auth::{Identity, SlotwiseAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::time::{format_instant, format_time_of_day};

pub struct SlotwiseHandler {
    engine: Arc<Engine>,
    admins: Arc<[String]>,
    query_parser: Arc<SlotwiseQueryParser>,
}

impl SlotwiseHandler {
    pub fn new(engine: Arc<Engine>, admins: Arc<[String]>) -> Self {
        Self {
            engine,
            admins,
            query_parser: Arc::new(SlotwiseQueryParser),
        }
    }

    fn identity<C: ClientInfo>(&self, client: &C) -> PgWireResult<Identity> {
        match client.metadata().get("user") {
            Some(user) if !user.is_empty() => Ok(Identity::resolve(user, &self.admins)),
            _ => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error("28000", "connection has no user name".into()))
            }
        }
    }

    /// Parse, authorise and execute one statement, recording query metrics.
    async fn run(
        &self,
        identity: &Identity,
        query: &str,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(identity, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        identity: &Identity,
        cmd: Command,
        format: Option<&Format>,
    ) -> Result<Response, EngineError> {
        if cmd.admin_only() && !identity.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        let engine = &self.engine;

        match cmd {
            Command::SelectAvailability { from, to } => {
                let slots = engine.available_slots(from, to).await?;
                rows(RowKind::Availability, format, slots, |enc, slot| {
                    enc.encode_field(&format_instant(slot))
                })
            }
            Command::InsertAppointment {
                start,
                notes,
                customer_id,
            } => {
                let owner = match customer_id {
                    Some(c) if identity.is_admin() => c,
                    Some(c) if c != identity.user => {
                        return Err(EngineError::Forbidden(
                            "customers may only book for themselves",
                        ));
                    }
                    _ => identity.user.clone(),
                };
                let appt = engine.book_appointment(&owner, start, notes).await?;
                rows(RowKind::Appointment, format, [appt], encode_appointment)
            }
            Command::SelectAppointments { id, mut filter } => {
                let mut appts = if identity.is_admin() {
                    engine.list_appointments(&filter).await
                } else {
                    if filter.customer_id.as_ref().is_some_and(|c| *c != identity.user) {
                        return Err(EngineError::Forbidden(
                            "customers may only list their own appointments",
                        ));
                    }
                    filter.customer_id = None;
                    if filter == AppointmentFilter::default() {
                        engine.customer_appointments(&identity.user).await
                    } else {
                        filter.customer_id = Some(identity.user.clone());
                        engine.list_appointments(&filter).await
                    }
                };
                if let Some(id) = id {
                    appts.retain(|a| a.id == id);
                }
                rows(RowKind::Appointment, format, appts, encode_appointment)
            }
            Command::UpdateAppointmentStatus { id, status } => {
                let appt = if identity.is_admin() {
                    engine.set_appointment_status(id, status).await?
                } else if status == AppointmentStatus::CancelledByCustomer {
                    engine.cancel_appointment(id, &identity.user).await?
                } else {
                    return Err(EngineError::Forbidden(
                        "customers may only set status cancelled_by_customer",
                    ));
                };
                rows(RowKind::Appointment, format, [appt], encode_appointment)
            }
            Command::InsertRule(new) => {
                let rule = engine.create_rule(new).await?;
                rows(RowKind::Rule, format, [rule], encode_rule)
            }
            Command::UpdateRule { id, update } => {
                let rule = engine.update_rule(id, update).await?;
                rows(RowKind::Rule, format, [rule], encode_rule)
            }
            Command::DeleteRule { id } => {
                engine.delete_rule(id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRules => {
                let rules = engine.list_rules().await;
                rows(RowKind::Rule, format, rules, encode_rule)
            }
            Command::InsertBlockOut(new) => {
                let block = engine.create_block_out(new).await?;
                rows(RowKind::BlockOut, format, [block], encode_block_out)
            }
            Command::UpdateBlockOut { id, update } => {
                let block = engine.update_block_out(id, update).await?;
                rows(RowKind::BlockOut, format, [block], encode_block_out)
            }
            Command::DeleteBlockOut { id } => {
                engine.delete_block_out(id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBlockOuts => {
                let blocks = engine.list_block_outs().await;
                rows(RowKind::BlockOut, format, blocks, encode_block_out)
            }
            Command::UpsertCustomer(customer) => {
                if !identity.is_admin() && customer.id != identity.user {
                    return Err(EngineError::Forbidden(
                        "customers may only update their own contact record",
                    ));
                }
                let customer = engine.upsert_customer(customer).await?;
                rows(RowKind::Customer, format, [customer], encode_customer)
            }
            Command::SelectCustomers { id } => {
                let customers = match (identity.is_admin(), id) {
                    (true, None) => engine.list_customers(),
                    (true, Some(id)) => engine.get_customer(&id).into_iter().collect(),
                    (false, Some(id)) if id != identity.user => {
                        return Err(EngineError::Forbidden(
                            "customers may only read their own contact record",
                        ));
                    }
                    (false, _) => engine.get_customer(&identity.user).into_iter().collect(),
                };
                rows(RowKind::Customer, format, customers, encode_customer)
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Col {
    Text,
    Int,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Availability,
    Appointment,
    Rule,
    BlockOut,
    Customer,
}

impl RowKind {
    fn columns(self) -> &'static [(&'static str, Col)] {
        match self {
            RowKind::Availability => &[("slot", Col::Text)],
            RowKind::Appointment => &[
                ("id", Col::Text),
                ("customer_id", Col::Text),
                ("start_time", Col::Text),
                ("end_time", Col::Text),
                ("status", Col::Text),
                ("notes", Col::Text),
                ("reminder_sent", Col::Bool),
                ("created_at", Col::Text),
            ],
            RowKind::Rule => &[
                ("id", Col::Text),
                ("day_of_week", Col::Int),
                ("start_time", Col::Text),
                ("end_time", Col::Text),
                ("slot_duration_minutes", Col::Int),
                ("is_active", Col::Bool),
            ],
            RowKind::BlockOut => &[
                ("id", Col::Text),
                ("start_time", Col::Text),
                ("end_time", Col::Text),
                ("reason", Col::Text),
            ],
            RowKind::Customer => &[("id", Col::Text), ("name", Col::Text), ("email", Col::Text)],
        }
    }

    fn schema(self, format: Option<&Format>) -> Vec<FieldInfo> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(i, (name, col))| {
                let ty = match col {
                    Col::Text => Type::VARCHAR,
                    Col::Int => Type::INT8,
                    Col::Bool => Type::BOOL,
                };
                let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(i));
                FieldInfo::new(name.to_string(), None, None, ty, field_format)
            })
            .collect()
    }

    /// Result shape of a statement before its parameters are bound.
    /// Every statement except DELETE returns rows.
    fn of_statement(sql: &str) -> Option<RowKind> {
        let upper = sql.trim_start().to_uppercase();
        if upper.starts_with("DELETE") {
            return None;
        }
        if upper.contains("AVAILABILITY_RULES") {
            Some(RowKind::Rule)
        } else if upper.contains("BLOCK_OUTS") {
            Some(RowKind::BlockOut)
        } else if upper.contains("APPOINTMENTS") {
            Some(RowKind::Appointment)
        } else if upper.contains("CUSTOMERS") {
            Some(RowKind::Customer)
        } else if upper.contains("AVAILABILITY") {
            Some(RowKind::Availability)
        } else {
            None
        }
    }
}

fn describe(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    RowKind::of_statement(sql).map_or_else(Vec::new, |kind| kind.schema(format))
}

fn rows<T>(
    kind: RowKind,
    format: Option<&Format>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Result<Response, EngineError> {
    let schema = Arc::new(kind.schema(format));
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_appointment(enc: &mut DataRowEncoder, appt: Appointment) -> PgWireResult<()> {
    enc.encode_field(&appt.id.to_string())?;
    enc.encode_field(&appt.customer_id)?;
    enc.encode_field(&format_instant(appt.span.start))?;
    enc.encode_field(&format_instant(appt.span.end))?;
    enc.encode_field(&appt.status.to_string())?;
    enc.encode_field(&appt.notes)?;
    enc.encode_field(&appt.reminder_sent)?;
    enc.encode_field(&format_instant(appt.created_at))
}

fn encode_rule(enc: &mut DataRowEncoder, rule: AvailabilityRule) -> PgWireResult<()> {
    enc.encode_field(&rule.id.to_string())?;
    enc.encode_field(&i64::from(rule.day_of_week))?;
    enc.encode_field(&format_time_of_day(rule.start_time))?;
    enc.encode_field(&format_time_of_day(rule.end_time))?;
    enc.encode_field(&rule.slot_duration_minutes)?;
    enc.encode_field(&rule.is_active)
}

fn encode_block_out(enc: &mut DataRowEncoder, block: BlockOutTime) -> PgWireResult<()> {
    enc.encode_field(&block.id.to_string())?;
    enc.encode_field(&format_instant(block.span.start))?;
    enc.encode_field(&format_instant(block.span.end))?;
    enc.encode_field(&block.reason)
}

fn encode_customer(enc: &mut DataRowEncoder, customer: Customer) -> PgWireResult<()> {
    enc.encode_field(&customer.id)?;
    enc.encode_field(&customer.name)?;
    enc.encode_field(&customer.email)
}

#[async_trait]
impl SimpleQueryHandler for SlotwiseHandler {
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
        let identity = self.identity(client)?;
        Ok(vec![self.run(&identity, query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotwiseQueryParser;

#[async_trait]
impl QueryParser for SlotwiseQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotwiseHandler {
    type Statement = String;
    type QueryParser = SlotwiseQueryParser;

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
        let identity = self.identity(client)?;
        let sql = substitute_params(portal);
        self.run(&identity, &sql, Some(&portal.result_column_format))
            .await
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
            describe(&target.statement, None),
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
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// Copy `sql`, handing each `$N` placeholder outside quoted literals and
/// identifiers to `param`, which writes its replacement into the output.
fn rewrite_placeholders(sql: &str, mut param: impl FnMut(usize, &str, &mut String)) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, so it needs no special case.
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '$' => {
                let mut end = i + 1;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                match sql[i + 1..end].parse::<usize>() {
                    Ok(n) => param(n, &sql[i..end], &mut out),
                    Err(_) => out.push('$'),
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    rewrite_placeholders(sql, |n, _, _| max = max.max(n));
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format) in one pass, so bound text is never rescanned.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

fn substitute(sql: &str, params: &[Option<String>]) -> String {
    rewrite_placeholders(sql, |n, raw, out| {
        match n.checked_sub(1).and_then(|i| params.get(i)) {
            Some(Some(text)) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(raw),
        }
    })
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SlotwiseFactory {
    handler: Arc<SlotwiseHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotwiseAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotwiseFactory {
    pub fn new(engine: Arc<Engine>, password: String, admins: Vec<String>) -> Self {
        let auth_source = SlotwiseAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotwiseHandler::new(engine, admins.into())),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotwiseFactory {
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
    factory: SlotwiseFactory,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
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

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::SlotTaken(_) => "23505",
        EngineError::SlotBlocked { .. } => "23P01",
        EngineError::CannotCancel(_) => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(msg) = &e {
        tracing::error!("internal error: {msg}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = if e.is_invalid_input() { "22023" } else { "42601" };
    user_error(code, e.to_string())
}
