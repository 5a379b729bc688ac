//! Plan execution: drives compiled plans against the B-tree engine through
//! the owning transaction's page view.

use crate::access::key::encode_key;
use crate::access::value::{deserialize_row, serialize_row, Value};
use crate::access::{BTree, PageStore};
use crate::catalog;
use crate::error::{Error, Result};
use crate::sql::ast::CompareOp;
use crate::sql::planner::{Filter, KeyBounds, Plan, ScanPlan};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

/// One result row: column names shared across the result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }
}

/// Rows produced by a query, in key order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Arc<Vec<String>>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

/// Outcome of executing one plan.
#[derive(Debug, PartialEq)]
pub enum ExecutionResult {
    RowsAffected(u64),
    Rows(ResultSet),
}

/// Execute a plan inside the given page view (normally a transaction).
pub fn execute<S: PageStore>(plan: Plan, store: &mut S) -> Result<ExecutionResult> {
    match plan {
        Plan::Begin | Plan::Commit | Plan::Rollback => Err(Error::Internal(
            "transaction control does not reach the executor".into(),
        )),
        Plan::CreateTable {
            name,
            columns,
            key_column,
        } => {
            catalog::create_table(store, &name, columns, key_column)?;
            log::debug!("created table {name}");
            Ok(ExecutionResult::RowsAffected(0))
        }
        Plan::DropTable { name } => {
            catalog::drop_table(store, &name)?;
            log::debug!("dropped table {name}");
            Ok(ExecutionResult::RowsAffected(0))
        }
        Plan::Insert { table, rows } => {
            let schema = table.schema();
            let mut tree = BTree::open(table.root);
            let mut inserted = 0u64;
            for row in rows {
                let key = encode_key(&row[table.key_column])?;
                let bytes = serialize_row(&row, &schema)?;
                tree.insert(store, &key, &bytes)?;
                inserted += 1;
            }
            catalog::update_root(store, table.table_id, tree.root())?;
            Ok(ExecutionResult::RowsAffected(inserted))
        }
        Plan::Scan(scan) => Ok(ExecutionResult::Rows(run_scan(&scan, store)?)),
        Plan::Delete {
            table,
            bounds,
            filters,
        } => {
            let schema = table.schema();
            let mut tree = BTree::open(table.root);

            // Collect matches first; deleting under a live cursor would pull
            // leaves out from beneath it.
            let mut doomed = Vec::new();
            let mut cursor = tree.range_scan(store, as_lo(&bounds), as_hi(&bounds))?;
            while let Some((key, bytes)) = cursor.next(store)? {
                let values = deserialize_row(&bytes, &schema)?;
                if matches_filters(&filters, &values) {
                    doomed.push(key);
                }
            }

            for key in &doomed {
                tree.delete(store, key)?;
            }
            catalog::update_root(store, table.table_id, tree.root())?;
            Ok(ExecutionResult::RowsAffected(doomed.len() as u64))
        }
    }
}

fn run_scan<S: PageStore>(scan: &ScanPlan, store: &mut S) -> Result<ResultSet> {
    let schema = scan.table.schema();
    let tree = BTree::open(scan.table.root);
    let columns = Arc::new(scan.output.clone());

    let mut rows = Vec::new();
    let mut cursor = tree.range_scan(store, as_lo(&scan.bounds), as_hi(&scan.bounds))?;
    while let Some((_key, bytes)) = cursor.next(store)? {
        let values = deserialize_row(&bytes, &schema)?;
        if !matches_filters(&scan.filters, &values) {
            continue;
        }
        rows.push(Row {
            columns: columns.clone(),
            values: scan.projection.iter().map(|&i| values[i].clone()).collect(),
        });
    }

    Ok(ResultSet { columns, rows })
}

fn as_lo(bounds: &KeyBounds) -> Bound<&[u8]> {
    as_ref(&bounds.lo)
}

fn as_hi(bounds: &KeyBounds) -> Bound<&[u8]> {
    as_ref(&bounds.hi)
}

fn as_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// A row passes when every filter holds. Comparisons involving NULL have no
/// ordering and therefore never match.
fn matches_filters(filters: &[Filter], values: &[Value]) -> bool {
    filters.iter().all(|filter| {
        match values[filter.column].compare(&filter.value) {
            None => false,
            Some(ordering) => match filter.op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            },
        }
    })
}
