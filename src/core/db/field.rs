/// Field Module
///
/// A field is one typed cell of a row. The stored value is a tagged variant;
/// its tag is fixed when the field is created and every accessor checks it.
use crate::core::{DbError, Result};
use std::fmt;

/// The column type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Double,
    Str,
    Blob,
}

impl FieldType {
    /// Maps a declared SQL column type to a field type.
    ///
    /// Follows SQLite's affinity rules. Returns `None` for NUMERIC affinity,
    /// where the stored value decides the type.
    pub fn from_decl_type(decl: &str) -> Option<Self> {
        let decl = decl.to_uppercase();
        if decl.contains("INT") {
            Some(FieldType::Int)
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            Some(FieldType::Str)
        } else if decl.contains("BLOB") || decl.trim().is_empty() {
            Some(FieldType::Blob)
        } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
            Some(FieldType::Double)
        } else {
            None
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int => "int",
            FieldType::Double => "double",
            FieldType::Str => "str",
            FieldType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// The value held by a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Double(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Str(_) => FieldType::Str,
            FieldValue::Blob(_) => FieldType::Blob,
        }
    }

    /// The zero value of a column type.
    pub fn zero(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Int => FieldValue::Int(0),
            FieldType::Double => FieldValue::Double(0.0),
            FieldType::Str => FieldValue::Str(String::new()),
            FieldType::Blob => FieldValue::Blob(Vec::new()),
        }
    }
}

/// A single named, typed cell with a dirty flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    value: FieldValue,
    changed: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Field {
            name: name.into(),
            value,
            changed: false,
        }
    }

    /// Creates a field holding the zero value of `field_type`.
    pub fn with_default(name: impl Into<String>, field_type: FieldType) -> Self {
        Field::new(name, FieldValue::zero(field_type))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    pub fn get_int(&self) -> Result<i64> {
        match self.value {
            FieldValue::Int(v) => Ok(v),
            _ => Err(self.mismatch(FieldType::Int)),
        }
    }

    pub fn get_double(&self) -> Result<f64> {
        match self.value {
            FieldValue::Double(v) => Ok(v),
            _ => Err(self.mismatch(FieldType::Double)),
        }
    }

    pub fn get_str(&self) -> Result<&str> {
        match &self.value {
            FieldValue::Str(v) => Ok(v),
            _ => Err(self.mismatch(FieldType::Str)),
        }
    }

    pub fn get_blob(&self) -> Result<&[u8]> {
        match &self.value {
            FieldValue::Blob(v) => Ok(v),
            _ => Err(self.mismatch(FieldType::Blob)),
        }
    }

    pub fn set_int(&mut self, val: i64) -> Result<()> {
        match &mut self.value {
            FieldValue::Int(v) => *v = val,
            _ => return Err(self.mismatch(FieldType::Int)),
        }
        self.changed = true;
        Ok(())
    }

    pub fn set_double(&mut self, val: f64) -> Result<()> {
        match &mut self.value {
            FieldValue::Double(v) => *v = val,
            _ => return Err(self.mismatch(FieldType::Double)),
        }
        self.changed = true;
        Ok(())
    }

    pub fn set_str(&mut self, val: &str) -> Result<()> {
        match &mut self.value {
            FieldValue::Str(v) => {
                v.clear();
                v.push_str(val);
            }
            _ => return Err(self.mismatch(FieldType::Str)),
        }
        self.changed = true;
        Ok(())
    }

    /// Replaces a blob value. The slice length is authoritative, so embedded
    /// zero bytes are kept.
    pub fn set_blob(&mut self, val: &[u8]) -> Result<()> {
        match &mut self.value {
            FieldValue::Blob(v) => {
                v.clear();
                v.extend_from_slice(val);
            }
            _ => return Err(self.mismatch(FieldType::Blob)),
        }
        self.changed = true;
        Ok(())
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn tag_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    fn mismatch(&self, expected: FieldType) -> DbError {
        debug_assert!(
            false,
            "field `{}` holds {}, accessed as {}",
            self.name,
            self.field_type(),
            expected
        );
        DbError::TypeMismatch {
            expected,
            actual: self.field_type(),
        }
    }
}
