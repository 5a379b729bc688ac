// Planner - resolves statements against the table directory, binds
// parameters, and compiles predicates into key bounds plus residual filters

use super::ast::*;
use crate::access::key::encode_key;
use crate::access::value::{DataType, Value};
use crate::catalog::{ColumnInfo, TableInfo};
use crate::error::{Error, Result};
use std::ops::Bound;

/// Executable form of a statement: a sequence of B-tree engine calls.
#[derive(Debug, Clone)]
pub enum Plan {
    CreateTable {
        name: String,
        columns: Vec<ColumnInfo>,
        key_column: usize,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: TableInfo,
        rows: Vec<Vec<Value>>,
    },
    Scan(ScanPlan),
    Delete {
        table: TableInfo,
        bounds: KeyBounds,
        filters: Vec<Filter>,
    },
    Begin,
    Commit,
    Rollback,
}

impl Plan {
    /// Whether executing this plan can change the database.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Plan::Scan(_))
    }
}

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub table: TableInfo,
    /// Column indices to project, in output order.
    pub projection: Vec<usize>,
    /// Output column names, parallel to `projection`.
    pub output: Vec<String>,
    pub bounds: KeyBounds,
    pub filters: Vec<Filter>,
}

/// Encoded key range a predicate narrows the scan to.
#[derive(Debug, Clone)]
pub struct KeyBounds {
    pub lo: Bound<Vec<u8>>,
    pub hi: Bound<Vec<u8>>,
}

impl KeyBounds {
    pub fn unbounded() -> Self {
        Self {
            lo: Bound::Unbounded,
            hi: Bound::Unbounded,
        }
    }
}

/// Residual comparison applied to each scanned row.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: usize,
    pub op: CompareOp,
    pub value: Value,
}

/// Compile a parsed statement against the current table directory.
pub fn plan(statement: Statement, params: &[Value], tables: &[TableInfo]) -> Result<Plan> {
    match statement {
        Statement::Begin => Ok(Plan::Begin),
        Statement::Commit => Ok(Plan::Commit),
        Statement::Rollback => Ok(Plan::Rollback),
        Statement::CreateTable(create) => plan_create_table(create),
        Statement::DropTable(drop) => {
            find_table(tables, &drop.table_name)?;
            Ok(Plan::DropTable {
                name: drop.table_name,
            })
        }
        Statement::Insert(insert) => plan_insert(insert, params, tables),
        Statement::Select(select) => plan_select(select, params, tables),
        Statement::Delete(delete) => {
            let table = find_table(tables, &delete.table_name)?.clone();
            let (bounds, filters) = compile_predicate(&table, delete.where_clause, params)?;
            Ok(Plan::Delete {
                table,
                bounds,
                filters,
            })
        }
    }
}

fn plan_create_table(create: CreateTableStatement) -> Result<Plan> {
    if create.columns.is_empty() {
        return Err(Error::Schema("a table needs at least one column".into()));
    }

    let mut seen = std::collections::HashSet::new();
    for column in &create.columns {
        if !seen.insert(column.name.as_str()) {
            return Err(Error::Schema(format!(
                "duplicate column name {}",
                column.name
            )));
        }
    }

    let key_columns: Vec<usize> = create
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary_key)
        .map(|(i, _)| i)
        .collect();
    let key_column = match key_columns.as_slice() {
        [] => 0, // the first column keys the table by default
        [single] => *single,
        _ => {
            return Err(Error::Schema(
                "only one column may be the primary key".into(),
            ))
        }
    };

    let key_type = create.columns[key_column].data_type;
    if !matches!(key_type, DataType::Integer | DataType::Text) {
        return Err(Error::Schema(format!(
            "a {} column cannot be the key",
            key_type.name()
        )));
    }

    Ok(Plan::CreateTable {
        name: create.table_name,
        columns: create
            .columns
            .into_iter()
            .map(|c| ColumnInfo {
                name: c.name,
                data_type: c.data_type,
            })
            .collect(),
        key_column,
    })
}

fn plan_insert(insert: InsertStatement, params: &[Value], tables: &[TableInfo]) -> Result<Plan> {
    let table = find_table(tables, &insert.table_name)?.clone();

    // Map the statement's column list (or the table's own order) to indices.
    let positions: Vec<usize> = match &insert.columns {
        None => (0..table.columns.len()).collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| no_such_column(&table, name))
            })
            .collect::<Result<_>>()?,
    };

    let mut rows = Vec::with_capacity(insert.rows.len());
    for literals in insert.rows {
        if literals.len() != positions.len() {
            return Err(Error::Schema(format!(
                "row has {} values but {} columns are named",
                literals.len(),
                positions.len()
            )));
        }
        let mut row = vec![Value::Null; table.columns.len()];
        for (position, literal) in positions.iter().zip(literals) {
            let value = resolve_literal(literal, params)?;
            row[*position] = value.coerce_to(table.columns[*position].data_type)?;
        }
        rows.push(row);
    }

    Ok(Plan::Insert { table, rows })
}

fn plan_select(select: SelectStatement, params: &[Value], tables: &[TableInfo]) -> Result<Plan> {
    let table = find_table(tables, &select.table_name)?.clone();

    let mut projection = Vec::new();
    for item in &select.projections {
        match item {
            SelectItem::AllColumns => projection.extend(0..table.columns.len()),
            SelectItem::Column(name) => projection.push(
                table
                    .column_index(name)
                    .ok_or_else(|| no_such_column(&table, name))?,
            ),
        }
    }
    let output = projection
        .iter()
        .map(|&i| table.columns[i].name.clone())
        .collect();

    let (bounds, filters) = compile_predicate(&table, select.where_clause, params)?;
    Ok(Plan::Scan(ScanPlan {
        table,
        projection,
        output,
        bounds,
        filters,
    }))
}

/// Flatten a predicate into key bounds (conditions on the key column) and
/// residual filters (everything else, evaluated per row).
fn compile_predicate(
    table: &TableInfo,
    expression: Option<Expression>,
    params: &[Value],
) -> Result<(KeyBounds, Vec<Filter>)> {
    let mut bounds = KeyBounds::unbounded();
    let mut filters = Vec::new();

    let mut pending = Vec::new();
    if let Some(expression) = expression {
        pending.push(expression);
    }

    while let Some(expression) = pending.pop() {
        match expression {
            Expression::And(left, right) => {
                pending.push(*left);
                pending.push(*right);
            }
            Expression::Between { column, low, high } => {
                let index = table
                    .column_index(&column)
                    .ok_or_else(|| no_such_column(table, &column))?;
                let low = resolve_literal(low, params)?
                    .coerce_to(table.columns[index].data_type)?;
                let high = resolve_literal(high, params)?
                    .coerce_to(table.columns[index].data_type)?;
                add_condition(table, &mut bounds, &mut filters, index, CompareOp::GtEq, low)?;
                add_condition(table, &mut bounds, &mut filters, index, CompareOp::LtEq, high)?;
            }
            Expression::Comparison { column, op, value } => {
                let index = table
                    .column_index(&column)
                    .ok_or_else(|| no_such_column(table, &column))?;
                let value =
                    resolve_literal(value, params)?.coerce_to(table.columns[index].data_type)?;
                add_condition(table, &mut bounds, &mut filters, index, op, value)?;
            }
        }
    }

    Ok((bounds, filters))
}

/// Fold one condition into the bounds when it constrains the key column,
/// otherwise keep it as a residual filter. NULL comparisons match nothing,
/// which the filter path already guarantees.
fn add_condition(
    table: &TableInfo,
    bounds: &mut KeyBounds,
    filters: &mut Vec<Filter>,
    column: usize,
    op: CompareOp,
    value: Value,
) -> Result<()> {
    let key_compatible = column == table.key_column
        && !matches!(value, Value::Null)
        && op != CompareOp::NotEq;

    if !key_compatible {
        filters.push(Filter { column, op, value });
        return Ok(());
    }

    let key = encode_key(&value)?;
    match op {
        CompareOp::Eq => {
            tighten_lo(&mut bounds.lo, Bound::Included(key.clone()));
            tighten_hi(&mut bounds.hi, Bound::Included(key));
        }
        CompareOp::Lt => tighten_hi(&mut bounds.hi, Bound::Excluded(key)),
        CompareOp::LtEq => tighten_hi(&mut bounds.hi, Bound::Included(key)),
        CompareOp::Gt => tighten_lo(&mut bounds.lo, Bound::Excluded(key)),
        CompareOp::GtEq => tighten_lo(&mut bounds.lo, Bound::Included(key)),
        CompareOp::NotEq => unreachable!("filtered above"),
    }
    Ok(())
}

fn tighten_lo(current: &mut Bound<Vec<u8>>, candidate: Bound<Vec<u8>>) {
    let stricter = match (&*current, &candidate) {
        (Bound::Unbounded, _) => true,
        (_, Bound::Unbounded) => false,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b)) => b > a,
        (Bound::Included(a), Bound::Excluded(b)) => b >= a,
        (Bound::Excluded(a), Bound::Excluded(b)) => b > a,
    };
    if stricter {
        *current = candidate;
    }
}

fn tighten_hi(current: &mut Bound<Vec<u8>>, candidate: Bound<Vec<u8>>) {
    let stricter = match (&*current, &candidate) {
        (Bound::Unbounded, _) => true,
        (_, Bound::Unbounded) => false,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b)) => b < a,
        (Bound::Included(a), Bound::Excluded(b)) => b <= a,
        (Bound::Excluded(a), Bound::Excluded(b)) => b < a,
    };
    if stricter {
        *current = candidate;
    }
}

fn resolve_literal(literal: Literal, params: &[Value]) -> Result<Value> {
    Ok(match literal {
        Literal::Null => Value::Null,
        Literal::Integer(i) => Value::Integer(i),
        Literal::Real(r) => Value::Real(r),
        Literal::String(s) => Value::Text(s),
        Literal::Boolean(b) => Value::Boolean(b),
        Literal::Parameter(index) => params
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Schema(format!("parameter {} was not provided", index + 1)))?,
    })
}

fn find_table<'a>(tables: &'a [TableInfo], name: &str) -> Result<&'a TableInfo> {
    tables
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::Schema(format!("table {name} does not exist")))
}

fn no_such_column(table: &TableInfo, name: &str) -> Error {
    Error::Schema(format!("table {} has no column {name}", table.name))
}
