//! Variable precedence and resolution.

mod common;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_yaml::Value;

use converge::vars::{
    parse_extra_vars, PlayScope, VarLayer, VarPrecedence, VarResolver, VariableBag,
};

fn layer(tier: VarPrecedence, key: &str, value: i64) -> VarLayer {
    VarLayer::new(
        tier,
        tier.to_string(),
        IndexMap::from([(key.to_string(), Value::Number(value.into()))]),
    )
}

proptest! {
    /// Whatever subset of tiers defines a key, and in whatever order the
    /// layers are pushed, the highest tier wins.
    #[test]
    fn prop_highest_tier_wins(
        mask in 1u16..(1 << 9),
        order in Just((0..9usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let tiers: Vec<VarPrecedence> = VarPrecedence::all().collect();
        let mut bag = VariableBag::new();
        for index in order {
            if mask & (1 << index) != 0 {
                let tier = tiers[index];
                bag.push(layer(tier, "x", tier.level() as i64));
            }
        }

        let expected = (0..9usize)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| tiers[i].level() as i64)
            .max()
            .unwrap();
        prop_assert_eq!(bag.get("x"), Some(&Value::Number(expected.into())));
        prop_assert_eq!(bag.origin("x").unwrap().precedence.level() as i64, expected);
    }

    /// Within one tier, a more specific rank wins
    #[test]
    fn prop_rank_orders_within_tier(ranks in prop::collection::vec(0usize..10, 1..6)) {
        let mut bag = VariableBag::new();
        for (i, rank) in ranks.iter().enumerate() {
            bag.push(layer(VarPrecedence::GroupVars, "x", i as i64).with_rank(*rank));
        }

        let top_rank = *ranks.iter().max().unwrap();
        // among equal top ranks, the last pushed wins
        let winner = ranks.iter().rposition(|r| *r == top_rank).unwrap() as i64;
        prop_assert_eq!(bag.get("x"), Some(&Value::Number(winner.into())));
    }
}

#[test]
fn test_overlay_leaves_original_untouched() {
    let mut base = VariableBag::new();
    base.push(layer(VarPrecedence::PlayVars, "x", 1));

    let derived = base.overlay(
        VarPrecedence::LoopVars,
        "loop",
        IndexMap::from([("x".to_string(), Value::Number(2.into()))]),
    );

    assert_eq!(base.get("x"), Some(&Value::Number(1.into())));
    assert_eq!(derived.get("x"), Some(&Value::Number(2.into())));
}

#[test]
fn test_resolver_tiers() {
    let inventory = common::inventory(
        r#"
all:
  vars:
    level: all
    only_all: true
  children:
    prod:
      vars:
        level: prod
      children:
        web:
          vars:
            level: web
          hosts:
            web1:
            web2:
              level: host
"#,
    );
    let resolver = VarResolver::new(&inventory);
    let extra = IndexMap::new();

    let web1 = resolver.effective_vars(
        inventory.get_host("web1").unwrap(),
        &PlayScope::default(),
        &extra,
    );
    assert_eq!(web1.get("level"), Some(&Value::String("web".into())));
    assert_eq!(web1.get("only_all"), Some(&Value::Bool(true)));
    assert_eq!(
        web1.get("inventory_hostname"),
        Some(&Value::String("web1".into()))
    );

    let web2 = resolver.effective_vars(
        inventory.get_host("web2").unwrap(),
        &PlayScope::default(),
        &extra,
    );
    assert_eq!(web2.get("level"), Some(&Value::String("host".into())));
    assert_eq!(web2.origin("level").unwrap().precedence, VarPrecedence::HostVars);
}

#[test]
fn test_resolver_roles_and_play() {
    let inventory = common::inventory("all:\n  hosts:\n    h1:\n      port: 1\n");
    let resolver = VarResolver::new(&inventory);

    let defaults = IndexMap::from([
        ("port".to_string(), Value::Number(0.into())),
        ("user".to_string(), Value::String("default".into())),
    ]);
    let role_vars = IndexMap::from([("user".to_string(), Value::String("role".into()))]);
    let play_vars = IndexMap::from([("port".to_string(), Value::Number(2.into()))]);
    let scope = PlayScope {
        play_vars: Some(&play_vars),
        roles: vec![("app", &defaults, &role_vars)],
    };
    let extra = IndexMap::from([("port".to_string(), Value::Number(3.into()))]);

    let host = inventory.get_host("h1").unwrap();
    let bag = resolver.effective_vars(host, &scope, &IndexMap::new());
    assert_eq!(bag.get("port"), Some(&Value::Number(2.into())));
    assert_eq!(bag.get("user"), Some(&Value::String("role".into())));

    let bag = resolver.effective_vars(host, &scope, &extra);
    assert_eq!(bag.get("port"), Some(&Value::Number(3.into())));
}

#[test]
fn test_magic_vars_cannot_be_overridden() {
    let inventory = common::inventory("all:\n  hosts:\n    h1:\n");
    let resolver = VarResolver::new(&inventory);
    let extra = IndexMap::from([(
        "inventory_hostname".to_string(),
        Value::String("spoofed".into()),
    )]);

    let bag = resolver.effective_vars(
        inventory.get_host("h1").unwrap(),
        &PlayScope::default(),
        &extra,
    );
    assert_eq!(bag.get("inventory_hostname"), Some(&Value::String("h1".into())));
}

#[test]
fn test_parse_extra_vars_forms() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("vars.yml");
    std::fs::write(&file, "from_file: 1\nshared: file\n").unwrap();

    let vars = parse_extra_vars(&[
        "a=1 b='two words'".to_string(),
        format!("@{}", file.display()),
        r#"{"shared": "inline", "list": [1, 2]}"#.to_string(),
    ])
    .unwrap();

    assert_eq!(vars["a"], Value::Number(1.into()));
    assert_eq!(vars["b"], Value::String("two words".into()));
    assert_eq!(vars["from_file"], Value::Number(1.into()));
    assert_eq!(vars["shared"], Value::String("inline".into()));
    assert!(vars["list"].is_sequence());
}

#[test]
fn test_parse_extra_vars_rejects_garbage() {
    assert!(parse_extra_vars(&["novalue".to_string()]).is_err());
    assert!(parse_extra_vars(&["@/nonexistent/vars.yml".to_string()]).is_err());
}
