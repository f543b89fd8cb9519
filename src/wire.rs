use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, ValidationReport, ViolationKind};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct OpschedHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<OpschedQueryParser>,
}

impl OpschedHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(OpschedQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Execute one parsed command and record RED metrics for it.
    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertWorkOrder { id, product, qty } => {
                engine
                    .create_work_order(id, product, qty)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteWorkOrder { id } => {
                engine.delete_work_order(&id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertOperations { operations } => {
                let count = engine.add_operations(operations).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::UpdateOperation { id, start, end } => {
                engine
                    .reschedule_operation(&id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectWorkOrders => {
                let work_orders = engine.list_work_orders().await;
                Ok(vec![rows_response(work_orders_schema(), work_orders, |enc, wo| {
                    enc.encode_field(&wo.id)?;
                    enc.encode_field(&wo.product)?;
                    enc.encode_field(&i64::from(wo.qty))?;
                    enc.encode_field(&(wo.operations.len() as i64))
                })])
            }
            Command::SelectOperations { filter } => {
                let operations = engine.list_operations(&filter).await;
                Ok(vec![rows_response(operations_schema(), operations, |enc, op| {
                    enc.encode_field(&op.id)?;
                    enc.encode_field(&op.work_order_id)?;
                    enc.encode_field(&i64::from(op.index))?;
                    enc.encode_field(&op.machine_id)?;
                    enc.encode_field(&op.name)?;
                    enc.encode_field(&format_instant(op.start()))?;
                    enc.encode_field(&format_instant(op.end()))
                })])
            }
            Command::SelectValidation {
                operation_id,
                start,
                end,
            } => {
                let decision = engine
                    .check_update(&operation_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let report = ValidationReport::from(&decision);
                Ok(vec![rows_response(validation_schema(), [report], |enc, report| {
                    enc.encode_field(&report.accepted)?;
                    enc.encode_field(&report.kind.map(|k| k.as_str().to_string()))?;
                    enc.encode_field(&report.message)?;
                    enc.encode_field(&report.details.map(|d| d.to_string()))
                })])
            }
            Command::SelectValidSlot {
                machine_id,
                duration,
                preferred_start,
                work_order_id,
                index,
                exclude_id,
            } => {
                let slot = engine
                    .find_valid_slot(
                        &machine_id,
                        duration,
                        preferred_start,
                        work_order_id.as_deref(),
                        index,
                        exclude_id.as_deref(),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![rows_response(valid_slot_schema(), [slot], |enc, slot| {
                    enc.encode_field(&slot.is_some())?;
                    enc.encode_field(&slot.map(format_instant))?;
                    enc.encode_field(&slot.map(|start| format_instant(start.saturating_add(duration))))
                })])
            }
            Command::SelectConstraints { operation_id } => {
                let bundle = engine
                    .get_constraints(&operation_id)
                    .await
                    .map_err(engine_err)?;
                let conflicts = to_json(&bundle.machine_conflicts)?;
                let prev = bundle.prev_operation.as_ref().map(to_json).transpose()?;
                let next = bundle.next_operation.as_ref().map(to_json).transpose()?;
                Ok(vec![rows_response(constraints_schema(), [bundle], |enc, b| {
                    enc.encode_field(&b.operation_id)?;
                    enc.encode_field(&b.work_order_id)?;
                    enc.encode_field(&b.machine_id)?;
                    enc.encode_field(&i64::from(b.index))?;
                    enc.encode_field(&format_instant(b.min_start))?;
                    enc.encode_field(&b.max_end.map(format_instant))?;
                    enc.encode_field(&prev)?;
                    enc.encode_field(&next)?;
                    enc.encode_field(&conflicts)
                })])
            }
            Command::SelectMachineConflicts {
                machine_id,
                window,
                exclude_id,
            } => {
                let conflicts = engine
                    .machine_conflicts(&machine_id, &window, exclude_id.as_deref())
                    .await;
                Ok(vec![rows_response(machine_conflicts_schema(), conflicts, |enc, c| {
                    enc.encode_field(&c.operation_id)?;
                    enc.encode_field(&c.work_order_id)?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&format_instant(c.start))?;
                    enc.encode_field(&format_instant(c.end))
                })])
            }
            Command::SelectSequenceCheck { work_order_id } => {
                let report = engine
                    .check_sequence(&work_order_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![rows_response(sequence_schema(), report.violations, |enc, v| {
                    enc.encode_field(&v.current_op)?;
                    enc.encode_field(&v.next_op)?;
                    enc.encode_field(&v.message)
                })])
            }
            Command::SelectFloorConflicts => {
                let conflicts = engine.audit_floor().await;
                Ok(vec![rows_response(floor_conflicts_schema(), conflicts, |enc, c| {
                    enc.encode_field(&c.operation_id)?;
                    enc.encode_field(&c.conflict_with)?;
                    enc.encode_field(&c.kind.as_str().to_string())
                })])
            }
        }
    }
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

// ── Result schemas ───────────────────────────────────────────────

fn column(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn work_orders_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("product", Type::VARCHAR),
        column("qty", Type::INT8),
        column("operation_count", Type::INT8),
    ]
}

fn operations_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("work_order_id", Type::VARCHAR),
        column("index", Type::INT8),
        column("machine_id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("start", Type::VARCHAR),
        column("end", Type::VARCHAR),
    ]
}

fn validation_schema() -> Vec<FieldInfo> {
    vec![
        column("accepted", Type::BOOL),
        column("kind", Type::VARCHAR),
        column("message", Type::VARCHAR),
        column("details", Type::VARCHAR),
    ]
}

fn valid_slot_schema() -> Vec<FieldInfo> {
    vec![
        column("found", Type::BOOL),
        column("start", Type::VARCHAR),
        column("end", Type::VARCHAR),
    ]
}

fn constraints_schema() -> Vec<FieldInfo> {
    vec![
        column("operation_id", Type::VARCHAR),
        column("work_order_id", Type::VARCHAR),
        column("machine_id", Type::VARCHAR),
        column("index", Type::INT8),
        column("min_start", Type::VARCHAR),
        column("max_end", Type::VARCHAR),
        column("prev_operation", Type::VARCHAR),
        column("next_operation", Type::VARCHAR),
        column("machine_conflicts", Type::VARCHAR),
    ]
}

fn machine_conflicts_schema() -> Vec<FieldInfo> {
    vec![
        column("operation_id", Type::VARCHAR),
        column("work_order_id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("start", Type::VARCHAR),
        column("end", Type::VARCHAR),
    ]
}

fn sequence_schema() -> Vec<FieldInfo> {
    vec![
        column("current_op", Type::VARCHAR),
        column("next_op", Type::VARCHAR),
        column("message", Type::VARCHAR),
    ]
}

fn floor_conflicts_schema() -> Vec<FieldInfo> {
    vec![
        column("operation_id", Type::VARCHAR),
        column("conflict_with", Type::VARCHAR),
        column("kind", Type::VARCHAR),
    ]
}

/// Result columns for a statement, keyed on the table after FROM.
/// Non-SELECT statements return no rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty());
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .unwrap_or_default()
        .trim_matches('"');
    match table {
        "work_orders" => work_orders_schema(),
        "operations" => operations_schema(),
        "validation" => validation_schema(),
        "valid_slot" => valid_slot_schema(),
        "constraints" => constraints_schema(),
        "machine_conflicts" => machine_conflicts_schema(),
        "sequence_check" => sequence_schema(),
        "floor_conflicts" => floor_conflicts_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for OpschedHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            match self.run_command(&engine, cmd).await {
                Ok(mut done) => responses.append(&mut done),
                // Earlier statements already ran; report the failure after their results.
                Err(PgWireError::UserError(info)) if !responses.is_empty() => {
                    responses.push(Response::Error(info));
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct OpschedQueryParser;

#[async_trait]
impl QueryParser for OpschedQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for OpschedHandler {
    type Statement = String;
    type QueryParser = OpschedQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let responses = self.run_command(&engine, cmd).await?;
        Ok(responses
            .into_iter()
            .next()
            .unwrap_or(Response::EmptyQuery))
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

/// `(byte_start, byte_end, n)` for every `$N` placeholder, left to right.
/// Text inside `'...'` literals and `"..."` identifiers is not scanned; a
/// doubled quote simply closes and reopens the span.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if let quote @ (b'\'' | b'"') = bytes[i] {
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            i += 1;
            continue;
        }
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start + 1..i].parse::<usize>() {
            found.push((start, i, n));
        }
    }
    found
}

/// The highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Substitute `$1, $2, ...` with bound parameter values (text format) in a
/// single pass, so parameter text is never rescanned for placeholders.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Authentication ───────────────────────────────────────────────

/// Single shared cleartext password for every user.
#[derive(Debug)]
pub struct SharedPasswordSource {
    password: String,
}

impl SharedPasswordSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct OpschedFactory {
    handler: Arc<OpschedHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl OpschedFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SharedPasswordSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(OpschedHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for OpschedFactory {
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
) -> io::Result<()> {
    let factory = Arc::new(OpschedFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn violation_sqlstate(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::InvalidInterval | ViolationKind::PastStart => "22023",
        ViolationKind::NotFound => "P0002",
        ViolationKind::SequenceViolation => "23514",
        ViolationKind::MachineConflict => "23P01",
    }
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Rejected(violation) => violation_sqlstate(violation.kind()),
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::DuplicateIndex { .. } => "23505",
        EngineError::InvalidInput(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let mut info = ErrorInfo::new("ERROR".into(), engine_sqlstate(&e).into(), e.to_string());
    if let EngineError::Rejected(violation) = &e {
        info.detail = Some(violation.details().to_string());
    }
    PgWireError::UserError(Box::new(info))
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidValue { .. } => "22023",
        SqlError::TooManyRows(_) => "54000",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sql_sqlstate(&e).into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SequenceBreach, Violation};

    #[test]
    fn placeholders_found_in_order() {
        assert_eq!(count_params("SELECT * FROM constraints WHERE operation_id = $1"), 1);
        assert_eq!(count_params("UPDATE operations SET start = $2, \"end\" = $3 WHERE id = $1"), 3);
        assert_eq!(count_params("SELECT * FROM work_orders"), 0);
        assert_eq!(count_params("SELECT '$' FROM x WHERE a = $12"), 12);
    }

    #[test]
    fn placeholders_inside_literals_are_text() {
        assert_eq!(count_params("SELECT * FROM operations WHERE name = 'costs $1'"), 0);
        assert_eq!(count_params("SELECT * FROM v WHERE a = 'it''s $3' AND b = $1"), 1);

        let params = vec![Some(b"O1".to_vec())];
        let sql = substitute_params(
            "SELECT * FROM v WHERE name = 'step $1' AND \"$1\" = 1 AND id = $1",
            &params,
        );
        assert_eq!(sql, "SELECT * FROM v WHERE name = 'step $1' AND \"$1\" = 1 AND id = 'O1'");
    }

    #[test]
    fn substitution_is_single_pass() {
        let params = vec![Some(b"$2".to_vec()), Some(b"O'1".to_vec())];
        let sql = substitute_params("SELECT * FROM v WHERE a = $1 AND b = $2", &params);
        assert_eq!(sql, "SELECT * FROM v WHERE a = '$2' AND b = 'O''1'");
    }

    #[test]
    fn substitution_of_null_and_out_of_range() {
        let params: Vec<Option<Vec<u8>>> = vec![None];
        let sql = substitute_params("SELECT * FROM v WHERE a = $1 AND b = $3", &params);
        assert_eq!(sql, "SELECT * FROM v WHERE a = NULL AND b = $3");
    }

    #[test]
    fn result_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(names("SELECT * FROM valid_slot WHERE machine_id = $1"), ["found", "start", "end"]);
        assert_eq!(names("select * from floor_conflicts;").len(), 3);
        assert!(names("UPDATE operations SET start = $1").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn sqlstate_per_violation_kind() {
        let rejected = |v: Violation| engine_sqlstate(&EngineError::Rejected(v));
        assert_eq!(rejected(Violation::InvalidInterval { start: 2, end: 1 }), "22023");
        assert_eq!(rejected(Violation::PastStart { start: 1, now: 2 }), "22023");
        assert_eq!(
            rejected(Violation::NotFound {
                work_order_id: "W1".into()
            }),
            "P0002"
        );
        assert_eq!(
            rejected(Violation::SequenceViolation(SequenceBreach::Predecessor {
                operation_id: "O1".into(),
                name: "Cut".into(),
                index: 0,
                end: 5,
            })),
            "23514"
        );
        assert_eq!(engine_sqlstate(&EngineError::LimitExceeded("id too long")), "54000");
        assert_eq!(engine_sqlstate(&EngineError::WalError("disk".into())), "XX000");
        assert_eq!(sql_sqlstate(&SqlError::Empty), "42601");
    }
}
