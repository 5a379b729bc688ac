//! Table directory, stored in the header page.
//!
//! The directory maps table names to their schema and B-tree root. It lives
//! in the header page's catalog region, so every change travels through the
//! owning transaction's write set like any other page edit and commits (or
//! vanishes) atomically with the data it describes.

use crate::access::value::DataType;
use crate::access::{BTree, PageStore};
use crate::error::{Error, Result};
use crate::storage::page::PageId;
use byteorder::{ByteOrder, LittleEndian};

pub type TableId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub root: PageId,
    pub key_column: usize,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn schema(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn key_type(&self) -> DataType {
        self.columns[self.key_column].data_type
    }
}

/// All tables, decoded from the header's directory bytes.
pub fn list_tables<S: PageStore>(store: &mut S) -> Result<Vec<TableInfo>> {
    let header = read_header(store)?;
    decode_directory(&header.catalog)
}

pub fn get_table<S: PageStore>(store: &mut S, name: &str) -> Result<Option<TableInfo>> {
    Ok(list_tables(store)?.into_iter().find(|t| t.name == name))
}

/// Create a table: allocate its empty B-tree and record it in the directory.
pub fn create_table<S: PageStore>(
    store: &mut S,
    name: &str,
    columns: Vec<ColumnInfo>,
    key_column: usize,
) -> Result<TableInfo> {
    let mut tables = list_tables(store)?;
    if tables.iter().any(|t| t.name == name) {
        return Err(Error::Schema(format!("table {name} already exists")));
    }

    let tree = BTree::create(store)?;
    let table = TableInfo {
        table_id: tables.iter().map(|t| t.table_id).max().unwrap_or(0) + 1,
        name: name.to_string(),
        root: tree.root(),
        key_column,
        columns,
    };
    tables.push(table.clone());
    save_directory(store, &tables)?;
    Ok(table)
}

/// Drop a table: release its pages and remove it from the directory.
pub fn drop_table<S: PageStore>(store: &mut S, name: &str) -> Result<()> {
    let mut tables = list_tables(store)?;
    let position = tables
        .iter()
        .position(|t| t.name == name)
        .ok_or_else(|| Error::Schema(format!("table {name} does not exist")))?;

    let table = tables.remove(position);
    BTree::open(table.root).destroy(store)?;
    save_directory(store, &tables)
}

/// Persist a table's new root after a split or merge moved it.
pub fn update_root<S: PageStore>(store: &mut S, table_id: TableId, root: PageId) -> Result<()> {
    let mut tables = list_tables(store)?;
    let table = tables
        .iter_mut()
        .find(|t| t.table_id == table_id)
        .ok_or_else(|| Error::Internal(format!("no table with id {table_id}")))?;
    if table.root == root {
        return Ok(());
    }
    table.root = root;
    save_directory(store, &tables)
}

fn read_header<S: PageStore>(store: &mut S) -> Result<crate::storage::disk::Header> {
    let image = store.read(PageId::HEADER)?;
    crate::storage::disk::Header::decode(&image)
}

fn save_directory<S: PageStore>(store: &mut S, tables: &[TableInfo]) -> Result<()> {
    let mut header = read_header(store)?;
    header.catalog = encode_directory(tables);
    store.write(PageId::HEADER, header.encode()?)
}

fn encode_directory(tables: &[TableInfo]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u16(&mut out, tables.len() as u16);
    for table in tables {
        push_u32(&mut out, table.table_id);
        push_u32(&mut out, table.root.0);
        push_u16(&mut out, table.key_column as u16);
        push_str(&mut out, &table.name);
        push_u16(&mut out, table.columns.len() as u16);
        for column in &table.columns {
            out.push(column.data_type as u8);
            push_str(&mut out, &column.name);
        }
    }
    out
}

fn decode_directory(data: &[u8]) -> Result<Vec<TableInfo>> {
    let mut reader = Reader { data, offset: 0 };
    let count = reader.u16()?;
    let mut tables = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let table_id = reader.u32()?;
        let root = PageId(reader.u32()?);
        let key_column = reader.u16()? as usize;
        let name = reader.string()?;
        let column_count = reader.u16()?;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let data_type = DataType::from_u8(reader.u8()?)?;
            columns.push(ColumnInfo {
                name: reader.string()?,
                data_type,
            });
        }
        if key_column >= columns.len() {
            return Err(Error::Corruption(format!(
                "table {name} key column {key_column} out of range"
            )));
        }
        tables.push(TableInfo {
            table_id,
            name,
            root,
            key_column,
            columns,
        });
    }
    Ok(tables)
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    push_u16(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.offset + n > self.data.len() {
            return Err(Error::Corruption("table directory truncated".into()));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Corruption("table name is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::MemStore;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "id".into(),
                data_type: DataType::Integer,
            },
            ColumnInfo {
                name: "name".into(),
                data_type: DataType::Text,
            },
        ]
    }

    #[test]
    fn test_create_and_get() -> Result<()> {
        let mut store = MemStore::with_header();
        let created = create_table(&mut store, "users", columns(), 0)?;

        let fetched = get_table(&mut store, "users")?.expect("table exists");
        assert_eq!(fetched, created);
        assert_eq!(fetched.key_type(), DataType::Integer);
        assert_eq!(fetched.column_index("name"), Some(1));
        assert!(get_table(&mut store, "missing")?.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_name_rejected() -> Result<()> {
        let mut store = MemStore::with_header();
        create_table(&mut store, "users", columns(), 0)?;
        assert!(matches!(
            create_table(&mut store, "users", columns(), 0),
            Err(Error::Schema(_))
        ));
        Ok(())
    }

    #[test]
    fn test_drop_removes_table_and_pages() -> Result<()> {
        let mut store = MemStore::with_header();
        let table = create_table(&mut store, "users", columns(), 0)?;
        assert!(store.pages.contains_key(&table.root));

        drop_table(&mut store, "users")?;
        assert!(get_table(&mut store, "users")?.is_none());
        assert!(!store.pages.contains_key(&table.root));

        assert!(matches!(
            drop_table(&mut store, "users"),
            Err(Error::Schema(_))
        ));
        Ok(())
    }

    #[test]
    fn test_update_root() -> Result<()> {
        let mut store = MemStore::with_header();
        let table = create_table(&mut store, "users", columns(), 0)?;

        update_root(&mut store, table.table_id, PageId(42))?;
        let fetched = get_table(&mut store, "users")?.unwrap();
        assert_eq!(fetched.root, PageId(42));
        Ok(())
    }

    #[test]
    fn test_table_ids_are_distinct() -> Result<()> {
        let mut store = MemStore::with_header();
        let a = create_table(&mut store, "a", columns(), 0)?;
        let b = create_table(&mut store, "b", columns(), 0)?;
        assert_ne!(a.table_id, b.table_id);
        Ok(())
    }

    #[test]
    fn test_directory_round_trip() -> Result<()> {
        let tables = vec![TableInfo {
            table_id: 3,
            name: "metrics".into(),
            root: PageId(17),
            key_column: 1,
            columns: vec![
                ColumnInfo {
                    name: "value".into(),
                    data_type: DataType::Real,
                },
                ColumnInfo {
                    name: "series".into(),
                    data_type: DataType::Text,
                },
            ],
        }];
        let encoded = encode_directory(&tables);
        assert_eq!(decode_directory(&encoded)?, tables);
        Ok(())
    }
}
