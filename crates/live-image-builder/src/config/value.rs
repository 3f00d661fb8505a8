use std::collections::BTreeMap;

use serde::Serialize;

pub type Map = BTreeMap<String, ConfigValue>;

/// A configuration value as read from a profile document or the command line.
///
/// TOML has no null; `Null` only enters through CLI overrides and means
/// "not supplied".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(Map),
}

impl ConfigValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_map()?.get(key)
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "table",
        }
    }

    /// Render a scalar the way it would appear on a command line.
    pub fn scalar_repr(&self) -> Option<String> {
        match self {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Integer(i) => Some(i.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }

    /// Convert to TOML, dropping nulls (TOML cannot represent them).
    pub fn to_toml(&self) -> Option<toml::Value> {
        match self {
            ConfigValue::Null => None,
            ConfigValue::Bool(b) => Some(toml::Value::Boolean(*b)),
            ConfigValue::Integer(i) => Some(toml::Value::Integer(*i)),
            ConfigValue::Float(f) => Some(toml::Value::Float(*f)),
            ConfigValue::String(s) => Some(toml::Value::String(s.clone())),
            ConfigValue::List(items) => Some(toml::Value::Array(
                items.iter().filter_map(ConfigValue::to_toml).collect(),
            )),
            ConfigValue::Map(m) => {
                let mut tbl = toml::Table::new();
                for (k, v) in m {
                    if let Some(v) = v.to_toml() {
                        tbl.insert(k.clone(), v);
                    }
                }
                Some(toml::Value::Table(tbl))
            }
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(v: toml::Value) -> Self {
        match v {
            toml::Value::String(s) => ConfigValue::String(s),
            toml::Value::Integer(i) => ConfigValue::Integer(i),
            toml::Value::Float(f) => ConfigValue::Float(f),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
            }
            toml::Value::Table(tbl) => ConfigValue::from(tbl),
        }
    }
}

impl From<toml::Table> for ConfigValue {
    fn from(tbl: toml::Table) -> Self {
        ConfigValue::Map(
            tbl.into_iter()
                .map(|(k, v)| (k, ConfigValue::from(v)))
                .collect(),
        )
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Integer(i)
    }
}

impl From<Option<String>> for ConfigValue {
    fn from(v: Option<String>) -> Self {
        v.map(ConfigValue::String).unwrap_or(ConfigValue::Null)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(items: Vec<String>) -> Self {
        ConfigValue::List(items.into_iter().map(ConfigValue::String).collect())
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(items: Vec<ConfigValue>) -> Self {
        ConfigValue::List(items)
    }
}

impl From<Map> for ConfigValue {
    fn from(m: Map) -> Self {
        ConfigValue::Map(m)
    }
}
