use std::fmt;

use bytes::{Buf, BufMut};

use super::data_type::CHAR_LENGTH_PREFIX;
use super::DataType;
use crate::common::{DbError, Result};

/// A typed value stored in one tuple field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    /// Used for `Char` columns
    String(String),
}

impl Value {
    /// Returns true if this value can be stored in a column of the given type.
    pub fn fits(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (Value::Boolean(_), DataType::Boolean)
            | (Value::Integer(_), DataType::Integer)
            | (Value::BigInt(_), DataType::BigInt) => true,
            (Value::String(s), DataType::Char(n)) => s.len() <= *n as usize,
            _ => false,
        }
    }

    /// Writes the value using exactly `data_type.size()` bytes.
    pub fn serialize<B: BufMut>(&self, data_type: &DataType, buf: &mut B) -> Result<()> {
        match (self, data_type) {
            (Value::Boolean(b), DataType::Boolean) => buf.put_u8(u8::from(*b)),
            (Value::Integer(v), DataType::Integer) => buf.put_i32(*v),
            (Value::BigInt(v), DataType::BigInt) => buf.put_i64(*v),
            (Value::String(s), DataType::Char(n)) => {
                let n = *n as usize;
                let bytes = s.as_bytes();
                if bytes.len() > n {
                    return Err(DbError::InvalidTuple(format!(
                        "string of {} bytes exceeds CHAR({})",
                        bytes.len(),
                        n
                    )));
                }
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
                buf.put_bytes(0, n - bytes.len());
            }
            _ => {
                return Err(DbError::InvalidTuple(format!(
                    "value {} is not a {}",
                    self, data_type
                )))
            }
        }
        Ok(())
    }

    /// Reads a value of the given type, consuming exactly `data_type.size()` bytes.
    pub fn deserialize<B: Buf>(buf: &mut B, data_type: &DataType) -> Result<Self> {
        if buf.remaining() < data_type.size() {
            return Err(DbError::InvalidTuple(format!(
                "{} needs {} bytes, {} available",
                data_type,
                data_type.size(),
                buf.remaining()
            )));
        }

        match data_type {
            DataType::Boolean => match buf.get_u8() {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(DbError::InvalidTuple(format!("bad boolean byte {}", other))),
            },
            DataType::Integer => Ok(Value::Integer(buf.get_i32())),
            DataType::BigInt => Ok(Value::BigInt(buf.get_i64())),
            DataType::Char(n) => {
                let n = *n as usize;
                let len = buf.get_u32() as usize;
                if len > n {
                    return Err(DbError::InvalidTuple(format!(
                        "stored length {} exceeds CHAR({})",
                        len, n
                    )));
                }
                let mut data = vec![0u8; n];
                buf.copy_to_slice(&mut data);
                data.truncate(len);
                String::from_utf8(data)
                    .map(Value::String)
                    .map_err(|e| DbError::InvalidTuple(e.to_string()))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
