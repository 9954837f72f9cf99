//! Attribute type resolution.
//!
//! Maps an attribute's declared data type to the SQL cast applied to its
//! JSONB text value, the comparison operators it supports, and the typed
//! parameter a rule value is bound as.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared data type of an attribute. Unrecognised type names resolve to
/// [`DataType::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Integer,
    Numeric,
    Boolean,
    DateTime,
    Text,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Text => "string",
        }
    }

    /// Resolve a declared type name. Never fails: anything unknown is text.
    pub fn resolve(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "long" | "bigint" => Self::Integer,
            "numeric" | "float" | "double" | "decimal" | "number" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "datetime" | "timestamp" | "timestamptz" | "date" => Self::DateTime,
            _ => Self::Text,
        }
    }

    /// Cast suffix appended to `attributes->>'name'`, if any.
    pub fn sql_cast(&self) -> Option<&'static str> {
        match self {
            Self::Integer => Some("::bigint"),
            Self::Numeric => Some("::numeric"),
            Self::Boolean => Some("::boolean"),
            Self::DateTime => Some("::timestamptz"),
            Self::Text => None,
        }
    }

    /// Comparison operators legal for this type.
    pub fn operators(&self) -> &'static [Operator] {
        use Operator::*;
        match self {
            Self::Integer | Self::Numeric => &[Eq, NotEq, Gt, Gte, Lt, Lte, In, IsNull, IsNotNull],
            Self::Boolean => &[Eq, NotEq, IsNull, IsNotNull],
            Self::DateTime => &[Eq, NotEq, Gt, Gte, Lt, Lte, IsNull, IsNotNull],
            Self::Text => &[Eq, NotEq, Contains, ILike, In, IsNull, IsNotNull],
        }
    }

    pub fn supports(&self, op: Operator) -> bool {
        self.operators().contains(&op)
    }

    /// Convert a rule value into the parameter bound for this type.
    pub fn coerce(&self, value: &serde_json::Value) -> Result<BoundValue, String> {
        use serde_json::Value;

        match (self, value) {
            (_, Value::Null) => Err("value is null".to_string()),
            (Self::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(BoundValue::BigInt)
                .ok_or_else(|| format!("{} is not an integer", n)),
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(BoundValue::BigInt)
                .map_err(|_| format!("'{}' is not an integer", s)),
            (Self::Numeric, Value::Number(n)) => parse_decimal(&n.to_string()),
            (Self::Numeric, Value::String(s)) => parse_decimal(s.trim()),
            (Self::Boolean, Value::Bool(b)) => Ok(BoundValue::Boolean(*b)),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(BoundValue::Boolean(true)),
                "false" => Ok(BoundValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            (Self::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| BoundValue::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|e| format!("'{}' is not an RFC 3339 timestamp: {}", s, e)),
            (Self::Text, Value::String(s)) => Ok(BoundValue::Text(s.clone())),
            (Self::Text, Value::Number(n)) => Ok(BoundValue::Text(n.to_string())),
            (Self::Text, Value::Bool(b)) => Ok(BoundValue::Text(b.to_string())),
            (ty, other) => Err(format!("{} cannot be compared as {}", other, ty)),
        }
    }
}

fn parse_decimal(s: &str) -> Result<BoundValue, String> {
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(s))
        .map(BoundValue::Numeric)
        .map_err(|_| format!("'{}' is not a number", s))
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        Self::resolve(&s)
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator of a condition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    IsNotNull,
    Contains,
    ILike,
}

impl Operator {
    /// Parse an operator as written in rule JSON. Case and inner whitespace
    /// are not significant (`"IS  NOT null"` is `IsNotNull`).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        match normalized.as_str() {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::NotEq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            "in" => Some(Self::In),
            "is null" => Some(Self::IsNull),
            "is not null" => Some(Self::IsNotNull),
            "contains" => Some(Self::Contains),
            "ilike" => Some(Self::ILike),
            _ => None,
        }
    }

    /// SQL keyword or symbol emitted for this operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::Contains => "LIKE",
            Self::ILike => "ILIKE",
        }
    }

    pub fn is_null_check(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// Resolve the cast suffix and the legal operators for a declared type name.
pub fn cast_and_operators(data_type: &str) -> (Option<&'static str>, &'static [Operator]) {
    let ty = DataType::resolve(data_type);
    (ty.sql_cast(), ty.operators())
}

/// A typed query parameter. Every user-supplied scalar reaches SQL only as
/// one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BoundValue {
    Text(String),
    BigInt(i64),
    Numeric(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl std::fmt::Display for BoundValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s),
            Self::BigInt(v) => write!(f, "{}", v),
            Self::Numeric(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Timestamp(v) => write!(f, "'{}'", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "'{}'", v),
        }
    }
}
