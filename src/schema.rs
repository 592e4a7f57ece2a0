//! Resource-kind registry
//!
//! Every kind that can be declared in the config file is listed in
//! [`KINDS`] with a typed field table. Config tables are checked against
//! that table before a resource is built, so builders only ever see
//! well-typed values.
//!
//! Two declaration forms are accepted:
//!
//! ```toml
//! # long form: an array of tables
//! [[file]]
//! path = "/etc/motd"
//! content = "hello\n"
//!
//! # short form: short key -> short value, or short key -> remaining fields
//! [file]
//! "/etc/issue" = "welcome\n"
//! "/etc/hosts.allow" = { source = "~/conf/hosts.allow", mode = "0644" }
//! ```

use std::collections::BTreeMap;

use declarative::BoxedResource;
use thiserror::Error;

use crate::resource::{dir, file, group, service, user};

/// Every kind that can be declared in a config file, by name
pub static KINDS: &[KindSchema] = &[
    dir::SCHEMA,
    file::SCHEMA,
    group::SCHEMA,
    service::SCHEMA,
    user::SCHEMA,
];

pub fn lookup(kind: &str) -> Option<&'static KindSchema> {
    KINDS.iter().find(|schema| schema.name == kind)
}

// ============================================================================
// Field Tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Bool,
    /// Octal permission bits, as `"0644"` or a TOML integer like `0o644`
    Mode,
    /// Array of strings; a single string is accepted as a one-element list
    List,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Mode => "mode",
            Self::List => "list of strings",
        }
    }
}

/// Part a field plays in the short declaration form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Plain,
    ShortKey,
    ShortValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
    Mode(u32),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(b),
            Self::Mode(m) => Value::Integer(i64::from(m)),
        }
    }

    pub fn render(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Mode(m) => format!("{m:04o}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub role: Role,
    /// Alternate spelling accepted in config files
    pub rename: Option<&'static str>,
    pub doc: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, ty: FieldType, doc: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
            role: Role::Plain,
            rename: None,
            doc,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub const fn short_key(mut self) -> Self {
        self.role = Role::ShortKey;
        self
    }

    pub const fn short_value(mut self) -> Self {
        self.role = Role::ShortValue;
        self
    }

    pub const fn rename(mut self, alias: &'static str) -> Self {
        self.rename = Some(alias);
        self
    }

    fn matches(&self, key: &str) -> bool {
        self.name == key || self.rename == Some(key)
    }
}

pub type Builder = fn(&Fields) -> Result<BoxedResource, SchemaError>;

/// A declarable resource kind
pub struct KindSchema {
    pub name: &'static str,
    pub summary: &'static str,
    pub fields: &'static [FieldSpec],
    pub build: Builder,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error("{kind}: unknown field '{field}'")]
    UnknownField { kind: &'static str, field: String },

    #[error("{kind}: field '{field}' must be a {expected}")]
    WrongType {
        kind: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{kind}: missing required field '{field}'")]
    Missing {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind}: field '{field}' is set more than once")]
    Duplicate {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind}: expected a table or an array of tables")]
    Shape { kind: &'static str },

    #[error("{kind}: no short form for this value")]
    NoShortForm { kind: &'static str },

    #[error("{kind}: {message}")]
    Invalid { kind: &'static str, message: String },
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Integer(i64),
    Bool(bool),
    List(Vec<String>),
}

/// Type-checked fields of one declaration, defaults applied
#[derive(Debug)]
pub struct Fields {
    kind: &'static str,
    values: BTreeMap<&'static str, Value>,
}

impl Fields {
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.str(name).map(str::to_string)
    }

    /// A string field with `~` expanded, for paths on the local machine
    pub fn local_path(&self, name: &str) -> Option<String> {
        self.str(name)
            .map(|s| shellexpand::tilde(s).into_owned())
    }

    pub fn require_str(&self, name: &'static str) -> Result<&str, SchemaError> {
        self.str(name).ok_or(SchemaError::Missing {
            kind: self.kind,
            field: name,
        })
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Integer field that must fit a uid or gid
    pub fn id(&self, name: &'static str) -> Result<Option<u32>, SchemaError> {
        match self.values.get(name) {
            Some(Value::Integer(i)) => u32::try_from(*i).map(Some).map_err(|_| {
                SchemaError::Invalid {
                    kind: self.kind,
                    message: format!("{name} {i} is out of range"),
                }
            }),
            _ => Ok(None),
        }
    }

    pub fn mode(&self, name: &str) -> Option<u32> {
        match self.values.get(name) {
            Some(Value::Integer(i)) => u32::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

/// Parse an octal mode such as `"0644"`, `"644"` or `"0o644"`.
pub fn parse_mode(s: &str) -> Option<u32> {
    let digits = s.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
}

// ============================================================================
// Parsing
// ============================================================================

/// Turn the resource tables of a config file into resources
///
/// Every top-level key must name a kind from [`KINDS`].
pub fn parse_resources(table: &toml::Table) -> Result<Vec<BoxedResource>, SchemaError> {
    let mut resources = Vec::new();
    for (kind, value) in table {
        let schema = lookup(kind).ok_or_else(|| SchemaError::UnknownKind(kind.clone()))?;
        match value {
            toml::Value::Array(items) => {
                for item in items {
                    let toml::Value::Table(fields) = item else {
                        return Err(SchemaError::Shape { kind: schema.name });
                    };
                    resources.push(schema.parse_long(fields)?);
                }
            }
            toml::Value::Table(entries) => {
                for (key, value) in entries {
                    resources.push(schema.parse_short(key, value)?);
                }
            }
            _ => return Err(SchemaError::Shape { kind: schema.name }),
        }
    }
    Ok(resources)
}

impl KindSchema {
    fn field(&self, role: Role) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.role == role)
    }

    fn parse_long(&self, table: &toml::Table) -> Result<BoxedResource, SchemaError> {
        let mut values = BTreeMap::new();
        self.collect(table, &mut values)?;
        self.finish(values)
    }

    fn parse_short(&self, key: &str, value: &toml::Value) -> Result<BoxedResource, SchemaError> {
        let short_key = self
            .field(Role::ShortKey)
            .ok_or(SchemaError::NoShortForm { kind: self.name })?;

        let mut values = BTreeMap::new();
        values.insert(short_key.name, Value::Str(key.to_string()));
        match value {
            toml::Value::Table(fields) => self.collect(fields, &mut values)?,
            other => {
                let short_value = self
                    .field(Role::ShortValue)
                    .ok_or(SchemaError::NoShortForm { kind: self.name })?;
                values.insert(short_value.name, self.convert(short_value, other)?);
            }
        }
        self.finish(values)
    }

    fn collect(
        &self,
        table: &toml::Table,
        values: &mut BTreeMap<&'static str, Value>,
    ) -> Result<(), SchemaError> {
        for (key, value) in table {
            let spec = self
                .fields
                .iter()
                .find(|f| f.matches(key))
                .ok_or_else(|| SchemaError::UnknownField {
                    kind: self.name,
                    field: key.clone(),
                })?;
            if values.insert(spec.name, self.convert(spec, value)?).is_some() {
                return Err(SchemaError::Duplicate {
                    kind: self.name,
                    field: spec.name,
                });
            }
        }
        Ok(())
    }

    fn finish(&self, mut values: BTreeMap<&'static str, Value>) -> Result<BoxedResource, SchemaError> {
        for spec in self.fields {
            if values.contains_key(spec.name) {
                continue;
            }
            if let Some(default) = spec.default {
                values.insert(spec.name, default.to_value());
            } else if spec.required {
                return Err(SchemaError::Missing {
                    kind: self.name,
                    field: spec.name,
                });
            }
        }
        (self.build)(&Fields {
            kind: self.name,
            values,
        })
    }

    fn convert(&self, spec: &FieldSpec, value: &toml::Value) -> Result<Value, SchemaError> {
        let wrong = || SchemaError::WrongType {
            kind: self.name,
            field: spec.name,
            expected: spec.ty.as_str(),
        };
        match (spec.ty, value) {
            (FieldType::String, toml::Value::String(s)) => Ok(Value::Str(s.clone())),
            (FieldType::Integer, toml::Value::Integer(i)) => Ok(Value::Integer(*i)),
            (FieldType::Bool, toml::Value::Boolean(b)) => Ok(Value::Bool(*b)),
            (FieldType::Mode, toml::Value::Integer(i)) if (0..=0o7777).contains(i) => {
                Ok(Value::Integer(*i))
            }
            (FieldType::Mode, toml::Value::String(s)) => parse_mode(s)
                .map(|mode| Value::Integer(i64::from(mode)))
                .ok_or_else(wrong),
            (FieldType::List, toml::Value::String(s)) => Ok(Value::List(vec![s.clone()])),
            (FieldType::List, toml::Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Value::List)
                .ok_or_else(wrong),
            _ => Err(wrong()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
