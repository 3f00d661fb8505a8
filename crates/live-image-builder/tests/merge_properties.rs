//! Property tests for layer merging.

use live_image_builder::config::{ConfigValue, Map};
use live_image_builder::merge::{NullMode, merge};
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = ConfigValue> {
    prop_oneof![
        any::<bool>().prop_map(ConfigValue::Bool),
        (-1000i64..1000).prop_map(ConfigValue::Integer),
        "[a-z]{0,6}".prop_map(ConfigValue::String),
    ]
}

fn scalar_list() -> impl Strategy<Value = ConfigValue> {
    prop::collection::vec(scalar(), 0..4).prop_map(ConfigValue::List)
}

fn scalar_table() -> impl Strategy<Value = ConfigValue> {
    prop::collection::btree_map("[a-c]", scalar(), 0..4).prop_map(ConfigValue::Map)
}

// Every layer shares one schema: `s*` keys are scalars, `l*` lists, `t*` tables.
fn layer() -> impl Strategy<Value = ConfigValue> {
    (
        prop::collection::btree_map("s[a-c]", scalar(), 0..3),
        prop::collection::btree_map("l[a-c]", scalar_list(), 0..3),
        prop::collection::btree_map("t[a-c]", scalar_table(), 0..3),
    )
        .prop_map(|(s, l, t)| {
            let mut m = Map::new();
            m.extend(s);
            m.extend(l);
            m.extend(t);
            ConfigValue::Map(m)
        })
}

proptest! {
    #[test]
    fn sequential_folding_matches_flattened_stack(a in layer(), b in layer(), c in layer()) {
        let left = merge(&merge(&a, &b, NullMode::Replace), &c, NullMode::Replace);
        let right = merge(&a, &merge(&b, &c, NullMode::Replace), NullMode::Replace);
        prop_assert_eq!(left, right);
    }

    #[test]
    fn keys_from_both_sides_survive(a in layer(), b in layer()) {
        let merged = merge(&a, &b, NullMode::Replace);
        let merged = merged.as_map().expect("map");
        for k in a.as_map().expect("map").keys().chain(b.as_map().expect("map").keys()) {
            prop_assert!(merged.contains_key(k));
        }
    }

    #[test]
    fn source_scalars_win(a in layer(), b in layer()) {
        let merged = merge(&a, &b, NullMode::Replace);
        for (k, v) in a.as_map().expect("map") {
            let is_scalar = !matches!(v, ConfigValue::List(_) | ConfigValue::Map(_));
            if is_scalar {
                prop_assert_eq!(merged.get(k), Some(v));
            }
        }
    }

    #[test]
    fn list_merge_is_concatenation(x in prop::collection::vec(scalar(), 0..6), y in prop::collection::vec(scalar(), 0..6)) {
        let merged = merge(&ConfigValue::List(x.clone()), &ConfigValue::List(y.clone()), NullMode::Replace);
        let mut expected = x;
        expected.extend(y);
        prop_assert_eq!(merged, ConfigValue::List(expected));
    }

    #[test]
    fn null_overrides_never_clobber(b in layer(), keys in prop::collection::vec("[slt][a-c]", 0..4)) {
        let mut overrides = Map::new();
        for k in keys {
            overrides.insert(k, ConfigValue::Null);
        }
        let merged = merge(&ConfigValue::Map(overrides), &b, NullMode::Skip);
        prop_assert_eq!(merged, b);
    }
}
