use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::engine::OperationFilter;
use crate::limits::{MAX_BATCH_SIZE, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;

const WORK_ORDER_COLUMNS: &[&str] = &["id", "product", "qty"];
const OPERATION_COLUMNS: &[&str] = &["id", "work_order_id", "index", "machine_id", "name", "start", "end"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertWorkOrder {
        id: WorkOrderId,
        product: String,
        qty: u32,
    },
    DeleteWorkOrder {
        id: WorkOrderId,
    },
    InsertOperations {
        operations: Vec<Operation>,
    },
    /// Validated reschedule. The interval is passed through unchecked so the
    /// engine can report an inverted one as a rule violation.
    UpdateOperation {
        id: OperationId,
        start: Ms,
        end: Ms,
    },
    SelectWorkOrders,
    SelectOperations {
        filter: OperationFilter,
    },
    SelectValidation {
        operation_id: OperationId,
        start: Ms,
        end: Ms,
    },
    SelectValidSlot {
        machine_id: MachineId,
        duration: Ms,
        preferred_start: Ms,
        work_order_id: Option<WorkOrderId>,
        index: Option<u32>,
        exclude_id: Option<OperationId>,
    },
    SelectConstraints {
        operation_id: OperationId,
    },
    SelectMachineConflicts {
        machine_id: MachineId,
        window: Span,
        exclude_id: Option<OperationId>,
    },
    SelectSequenceCheck {
        work_order_id: WorkOrderId,
    },
    SelectFloorConflicts,
}

/// Parse a single statement.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    commands.pop().ok_or(SqlError::Empty)
}

/// Parse every `;`-separated statement of a simple query, in order.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() > MAX_BATCH_SIZE {
        return Err(SqlError::TooManyRows(rows.len()));
    }

    match table.as_str() {
        "work_orders" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row INSERT into work_orders".into()));
            }
            let row = Row::new(&columns, WORK_ORDER_COLUMNS, &rows[0])?;
            Ok(Command::InsertWorkOrder {
                id: parse_string(row.require("id")?, "id")?,
                product: parse_string(row.require("product")?, "product")?,
                qty: match row.get("qty") {
                    Some(expr) => parse_u32(expr, "qty")?,
                    None => 0,
                },
            })
        }
        "operations" => {
            let mut operations = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let op = parse_operation_row(&columns, values)
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                operations.push(op);
            }
            Ok(Command::InsertOperations { operations })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_operation_row(columns: &[String], values: &[Expr]) -> Result<Operation, SqlError> {
    let row = Row::new(columns, OPERATION_COLUMNS, values)?;
    let start = parse_instant_expr(row.require("start")?, "start")?;
    let end = parse_instant_expr(row.require("end")?, "end")?;
    let span = Span::try_new(start, end).ok_or(SqlError::InvalidValue {
        column: "end",
        reason: "start must be before end".into(),
    })?;
    Ok(Operation {
        id: parse_string(row.require("id")?, "id")?,
        work_order_id: parse_string(row.require("work_order_id")?, "work_order_id")?,
        index: parse_u32(row.require("index")?, "index")?,
        machine_id: parse_string(row.require("machine_id")?, "machine_id")?,
        name: match row.get("name") {
            Some(expr) => parse_string(expr, "name")?,
            None => String::new(),
        },
        span,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;
    let id = parse_string(filters.eq("id").ok_or(SqlError::MissingFilter("id"))?, "id")?;

    match table.as_str() {
        "work_orders" => Ok(Command::DeleteWorkOrder { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "operations" {
        return Err(SqlError::UnknownTable(table));
    }

    let (mut start, mut end) = (None, None);
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match column.as_deref() {
            Some("start") => start = Some(parse_instant_expr(&assignment.value, "start")?),
            Some("end") => end = Some(parse_instant_expr(&assignment.value, "end")?),
            Some(other) => {
                return Err(SqlError::Unsupported(format!("UPDATE of column {other}")));
            }
            None => return Err(SqlError::Unsupported("tuple assignment".into())),
        }
    }

    let filters = Filters::collect(selection)?;
    let id = parse_string(filters.eq("id").ok_or(SqlError::MissingFilter("id"))?, "id")?;
    Ok(Command::UpdateOperation {
        id,
        start: start.ok_or(SqlError::MissingColumn("start"))?,
        end: end.ok_or(SqlError::MissingColumn("end"))?,
    })
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
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "work_orders" => Ok(Command::SelectWorkOrders),
        "operations" => Ok(Command::SelectOperations {
            filter: OperationFilter {
                work_order_id: filters.optional_string("work_order_id")?,
                machine_id: filters.optional_string("machine_id")?,
            },
        }),
        "validation" => Ok(Command::SelectValidation {
            operation_id: filters.required_string("operation_id")?,
            start: parse_instant_expr(filters.eq("start").ok_or(SqlError::MissingFilter("start"))?, "start")?,
            end: parse_instant_expr(filters.eq("end").ok_or(SqlError::MissingFilter("end"))?, "end")?,
        }),
        "valid_slot" => {
            let hours = filters
                .eq("duration_hours")
                .ok_or(SqlError::MissingFilter("duration_hours"))?;
            let preferred_start = match filters.eq("preferred_start") {
                Some(expr) => parse_instant_expr(expr, "preferred_start")?,
                // As soon as the machine and the chain allow.
                None => MIN_VALID_TIMESTAMP_MS,
            };
            let index = filters
                .eq("index")
                .map(|expr| parse_u32(expr, "index"))
                .transpose()?;
            Ok(Command::SelectValidSlot {
                machine_id: filters.required_string("machine_id")?,
                duration: parse_hours_expr(hours, "duration_hours")?,
                preferred_start,
                work_order_id: filters.optional_string("work_order_id")?,
                index,
                exclude_id: filters.optional_string("exclude_id")?,
            })
        }
        "constraints" => Ok(Command::SelectConstraints {
            operation_id: filters.required_string("operation_id")?,
        }),
        "machine_conflicts" => {
            let start = filters.lower("start").ok_or(SqlError::MissingFilter("start"))?;
            let end = filters.upper("end").ok_or(SqlError::MissingFilter("end"))?;
            let start = parse_instant_expr(start, "start")?;
            let end = parse_instant_expr(end, "end")?;
            let window = Span::try_new(start, end).ok_or(SqlError::InvalidValue {
                column: "end",
                reason: "window start must be before end".into(),
            })?;
            Ok(Command::SelectMachineConflicts {
                machine_id: filters.required_string("machine_id")?,
                window,
                exclude_id: filters.optional_string("exclude_id")?,
            })
        }
        "sequence_check" => Ok(Command::SelectSequenceCheck {
            work_order_id: filters.required_string("work_order_id")?,
        }),
        "floor_conflicts" => Ok(Command::SelectFloorConflicts),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Rows and filters ──────────────────────────────────────────

/// One VALUES row addressed by column name. Without a column list the
/// table's declared column order applies.
struct Row<'a> {
    columns: Vec<&'a str>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(named: &'a [String], declared: &'a [&'a str], values: &'a [Expr]) -> Result<Self, SqlError> {
        let columns: Vec<&str> = if named.is_empty() {
            declared.iter().take(values.len()).copied().collect()
        } else {
            named.iter().map(String::as_str).collect()
        };
        if columns.len() != values.len() {
            return Err(SqlError::Parse(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        if let Some(unknown) = columns.iter().find(|c| !declared.contains(*c)) {
            return Err(SqlError::Parse(format!("unknown column: {unknown}")));
        }
        Ok(Self { columns, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .map(|i| &self.values[i])
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

struct Filter<'a> {
    column: String,
    op: BinaryOperator,
    value: &'a Expr,
}

/// Conjunction of `column <op> value` predicates from a WHERE clause.
struct Filters<'a>(Vec<Filter<'a>>);

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut filters)?;
        }
        Ok(Self(filters))
    }

    fn find(&self, column: &str, ops: &[BinaryOperator]) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|f| f.column == column && ops.contains(&f.op))
            .map(|f| f.value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &[BinaryOperator::Eq])
    }

    fn lower(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &[BinaryOperator::GtEq, BinaryOperator::Eq])
    }

    fn upper(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &[BinaryOperator::LtEq, BinaryOperator::Eq])
    }

    fn required_string(&self, column: &'static str) -> Result<String, SqlError> {
        let expr = self.eq(column).ok_or(SqlError::MissingFilter(column))?;
        parse_string(expr, column)
    }

    fn optional_string(&self, column: &'static str) -> Result<Option<String>, SqlError> {
        self.eq(column).map(|expr| parse_string(expr, column)).transpose()
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right }
            if matches!(op, BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq) =>
        {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("predicate on {left}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn invalid(column: &'static str, reason: impl Into<String>) -> SqlError {
    SqlError::InvalidValue {
        column,
        reason: reason.into(),
    }
}

fn parse_string(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(invalid(column, format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr, column: &'static str) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| invalid(column, format!("bad integer {s:?}: {e}"))),
            _ => Err(invalid(column, format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr, column)?
            .checked_neg()
            .ok_or_else(|| invalid(column, "integer out of range"))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr, column: &'static str) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr, column)?;
    u32::try_from(v).map_err(|_| invalid(column, format!("{v} out of range")))
}

/// ISO-8601 with an offset, or integer unix milliseconds.
fn parse_instant_expr(expr: &Expr, column: &'static str) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            if let Ok(ms) = s.trim().parse::<i64>() {
                return Ok(ms);
            }
            parse_instant(s).map_err(|e| invalid(column, format!("bad timestamp {s:?}: {e}")))
        }
        _ => parse_i64_expr(expr, column),
    }
}

fn parse_hours_expr(expr: &Expr, column: &'static str) -> Result<Ms, SqlError> {
    let hours: f64 = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| invalid(column, format!("bad number {s:?}: {e}")))?,
        Some(other) => return Err(invalid(column, format!("expected number, got {other}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr}"))),
    };
    hours_to_ms(hours).ok_or_else(|| invalid(column, format!("{hours} is not a positive duration")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value for {column}: {reason}")]
    InvalidValue { column: &'static str, reason: String },
    #[error("too many rows in one statement: {0}")]
    TooManyRows(usize),
}
