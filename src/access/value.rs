use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

/// Column types supported by the engine: the set the original client
/// bindings marshalled.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer = 1,
    Real = 2,
    Text = 3,
    Boolean = 4,
}

impl DataType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Integer),
            2 => Ok(DataType::Real),
            3 => Ok(DataType::Text),
            4 => Ok(DataType::Boolean),
            _ => Err(Error::Corruption(format!("unknown data type tag {value}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Real(_) => Some(DataType::Real),
            Value::Text(_) => Some(DataType::Text),
            Value::Boolean(_) => Some(DataType::Boolean),
        }
    }

    /// Convert to the column's type where a lossless conversion exists
    /// (integers widen to reals); otherwise report the mismatch.
    pub fn coerce_to(self, data_type: DataType) -> Result<Value> {
        match (self, data_type) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Integer(i), DataType::Real) => Ok(Value::Real(i as f64)),
            (v, t) if v.data_type() == Some(t) => Ok(v),
            (v, t) => Err(Error::Schema(format!(
                "value {v} is not assignable to a {} column",
                t.name()
            ))),
        }
    }

    /// Order two values of the same (or numerically compatible) type.
    /// NULL compares with nothing, so predicates on NULL never match.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
            (Value::Real(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Serialize a row according to its schema: a NULL bitmap followed by the
/// non-NULL column values.
pub fn serialize_row(values: &[Value], schema: &[DataType]) -> Result<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(Error::Schema(format!(
            "row has {} values but the table has {} columns",
            values.len(),
            schema.len()
        )));
    }

    let bitmap_len = schema.len().div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, value) in values.iter().enumerate() {
        if matches!(value, Value::Null) {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }

    let mut data = bitmap;
    for (value, data_type) in values.iter().zip(schema.iter()) {
        match (value, data_type) {
            (Value::Null, _) => {}
            (Value::Integer(i), DataType::Integer) => {
                data.extend_from_slice(&i.to_le_bytes());
            }
            (Value::Real(r), DataType::Real) => {
                data.extend_from_slice(&r.to_bits().to_le_bytes());
            }
            (Value::Boolean(b), DataType::Boolean) => {
                data.push(u8::from(*b));
            }
            (Value::Text(s), DataType::Text) => {
                data.extend_from_slice(&(s.len() as u32).to_le_bytes());
                data.extend_from_slice(s.as_bytes());
            }
            (v, t) => {
                return Err(Error::Schema(format!(
                    "value {v} does not match column type {}",
                    t.name()
                )))
            }
        }
    }
    Ok(data)
}

/// Decode a row serialized by [`serialize_row`].
pub fn deserialize_row(data: &[u8], schema: &[DataType]) -> Result<Vec<Value>> {
    let bitmap_len = schema.len().div_ceil(8);
    if data.len() < bitmap_len {
        return Err(Error::Corruption("row shorter than its NULL bitmap".into()));
    }
    let (bitmap, mut rest) = data.split_at(bitmap_len);

    let mut values = Vec::with_capacity(schema.len());
    for (i, data_type) in schema.iter().enumerate() {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        match data_type {
            DataType::Integer => {
                if rest.len() < 8 {
                    return Err(Error::Corruption("truncated integer column".into()));
                }
                values.push(Value::Integer(LittleEndian::read_i64(rest)));
                rest = &rest[8..];
            }
            DataType::Real => {
                if rest.len() < 8 {
                    return Err(Error::Corruption("truncated real column".into()));
                }
                values.push(Value::Real(f64::from_bits(LittleEndian::read_u64(rest))));
                rest = &rest[8..];
            }
            DataType::Boolean => {
                if rest.is_empty() {
                    return Err(Error::Corruption("truncated boolean column".into()));
                }
                values.push(Value::Boolean(rest[0] != 0));
                rest = &rest[1..];
            }
            DataType::Text => {
                if rest.len() < 4 {
                    return Err(Error::Corruption("truncated text length".into()));
                }
                let len = LittleEndian::read_u32(rest) as usize;
                rest = &rest[4..];
                if rest.len() < len {
                    return Err(Error::Corruption("truncated text column".into()));
                }
                let s = std::str::from_utf8(&rest[..len])
                    .map_err(|_| Error::Corruption("text column is not UTF-8".into()))?;
                values.push(Value::Text(s.to_string()));
                rest = &rest[len..];
            }
        }
    }
    Ok(values)
}
