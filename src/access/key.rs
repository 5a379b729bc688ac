//! Order-preserving key encoding.
//!
//! B-tree keys are compared as raw bytes, so key columns must encode such
//! that byte order equals value order. Integers flip the sign bit and go
//! big-endian; text is already ordered byte-wise as UTF-8.

use crate::error::{Error, Result};
use crate::access::value::{DataType, Value};

const SIGN_BIT: u64 = 1 << 63;

/// Encode a key-column value. Only `INTEGER` and `TEXT` columns may be keys.
pub fn encode_key(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Integer(i) => Ok(((*i as u64) ^ SIGN_BIT).to_be_bytes().to_vec()),
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        Value::Null => Err(Error::Schema("key column cannot be NULL".into())),
        other => Err(Error::Schema(format!(
            "type {} cannot be used as a key",
            other.data_type().map(|t| t.name()).unwrap_or("NULL")
        ))),
    }
}

/// Decode a key back into its column value.
pub fn decode_key(bytes: &[u8], data_type: DataType) -> Result<Value> {
    match data_type {
        DataType::Integer => {
            let raw: [u8; 8] = bytes
                .try_into()
                .map_err(|_| Error::Corruption("integer key has wrong length".into()))?;
            Ok(Value::Integer((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64))
        }
        DataType::Text => {
            let s = std::str::from_utf8(bytes)
                .map_err(|_| Error::Corruption("text key is not UTF-8".into()))?;
            Ok(Value::Text(s.to_string()))
        }
        other => Err(Error::Schema(format!(
            "type {} cannot be used as a key",
            other.name()
        ))),
    }
}
