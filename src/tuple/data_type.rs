use std::fmt;

/// Field types that can be stored in a heap page.
/// Every type has a fixed on-disk width so that a page is a plain slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean: 1 byte (0 = false, 1 = true)
    Boolean,

    /// 32-bit signed integer: 4 bytes, big-endian
    Integer,

    /// 64-bit signed integer: 8 bytes, big-endian
    BigInt,

    /// String of at most n bytes.
    /// Stored as: length (4 bytes) + data zero-padded to n bytes
    Char(u16),
}

/// Width of the length prefix in front of `Char` data
pub(crate) const CHAR_LENGTH_PREFIX: usize = 4;

impl DataType {
    /// Returns the number of bytes a value of this type occupies on disk.
    pub fn size(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Integer => 4,
            DataType::BigInt => 8,
            DataType::Char(n) => CHAR_LENGTH_PREFIX + *n as usize,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::BigInt => write!(f, "BIGINT"),
            DataType::Char(n) => write!(f, "CHAR({})", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_calculations() {
        assert_eq!(DataType::Boolean.size(), 1);
        assert_eq!(DataType::Integer.size(), 4);
        assert_eq!(DataType::BigInt.size(), 8);
        assert_eq!(DataType::Char(20).size(), 24);
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::Integer.to_string(), "INTEGER");
        assert_eq!(DataType::Char(10).to_string(), "CHAR(10)");
    }
}
