//! Layer merging.
//!
//! `merge(source, base)` gives `source` precedence: tables merge recursively,
//! lists concatenate as `source ++ base`, anything else is replaced by the
//! source value. In skip-null mode a null source value never clobbers `base`.

use crate::config::{ConfigValue, Map};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullMode {
    /// Null replaces the base value like any other scalar.
    #[default]
    Replace,
    /// Null means "not supplied" and leaves the base value alone.
    Skip,
}

pub fn merge(source: &ConfigValue, base: &ConfigValue, nulls: NullMode) -> ConfigValue {
    match (source, base) {
        (ConfigValue::Map(src), ConfigValue::Map(dst)) => ConfigValue::Map(merge_maps(src, dst, nulls)),
        (ConfigValue::List(src), ConfigValue::List(dst)) => {
            ConfigValue::List(src.iter().chain(dst.iter()).cloned().collect())
        }
        (ConfigValue::Null, base_val) if nulls == NullMode::Skip => base_val.clone(),
        (src_val, _) => src_val.clone(),
    }
}

pub fn merge_maps(source: &Map, base: &Map, nulls: NullMode) -> Map {
    let mut out = base.clone();
    for (k, v) in source {
        match out.get(k) {
            Some(existing) => {
                let merged = merge(v, existing, nulls);
                out.insert(k.clone(), merged);
            }
            None => {
                // Nothing to preserve; an unset override must not introduce the key.
                if v.is_null() && nulls == NullMode::Skip {
                    continue;
                }
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}
