//! Ready-made rule-sets, used by the demo binary and the test suites.

use std::collections::BTreeMap;

use crate::rules::{
    ActionDef, AroundDef, ConditionDef, ExprDef, MatchPolicy, OffsetDef, RuleDef, RuleSetDef,
};

fn rule(name: &str, when: ConditionDef, then: Vec<ActionDef>) -> RuleDef {
    RuleDef {
        name: Some(name.to_owned()),
        when,
        then,
    }
}

fn centre_is(block: &str) -> ConditionDef {
    ConditionDef::is(OffsetDef::default(), block)
}

fn field(name: &str) -> ExprDef {
    ExprDef::Field {
        at: OffsetDef::default(),
        name: name.to_owned(),
    }
}

fn count(around: &str, when: ConditionDef) -> ExprDef {
    ExprDef::Count {
        around: AroundDef::Named(around.to_owned()),
        when: Box::new(when),
    }
}

fn set(name: &str, value: ExprDef) -> ActionDef {
    ActionDef::Set {
        field: name.to_owned(),
        value,
    }
}

fn rule_set(name: &str, scope: &[&str], fields: &[(&str, u8)], rules: Vec<RuleDef>) -> RuleSetDef {
    RuleSetDef {
        name: name.to_owned(),
        scope: scope.iter().map(|s| (*s).to_owned()).collect(),
        policy: MatchPolicy::FirstMatch,
        fields: fields
            .iter()
            .map(|(name, slot)| ((*name).to_owned(), *slot))
            .collect::<BTreeMap<_, _>>(),
        rules,
    }
}

/// Sand falls one cell per tick into empty space.
///
/// The move is a swap split into two complementary rules: the sand cell takes
/// the void below it, and the void cell takes the sand above it. Both read the
/// same snapshot, so the pair always agrees.
pub fn gravity() -> RuleSetDef {
    rule_set(
        "gravity",
        &["sand", "void"],
        &[],
        vec![
            rule(
                "fall",
                ConditionDef::all([
                    centre_is("sand"),
                    ConditionDef::is(OffsetDef::named("down"), "void"),
                ]),
                vec![ActionDef::Copy {
                    from: OffsetDef::named("down"),
                }],
            ),
            rule(
                "land",
                ConditionDef::all([
                    centre_is("void"),
                    ConditionDef::is(OffsetDef::named("up"), "sand"),
                ]),
                vec![ActionDef::Copy {
                    from: OffsetDef::named("up"),
                }],
            ),
        ],
    )
}

/// Conway's game of life on the horizontal plane, live cells are `white`.
pub fn game_of_life() -> RuleSetDef {
    let neighbors = || count("moore2d", centre_is("white"));
    rule_set(
        "game_of_life",
        &["white", "void"],
        &[],
        vec![
            rule(
                "die",
                ConditionDef::all([
                    centre_is("white"),
                    ConditionDef::Not(Box::new(ConditionDef::Any(vec![
                        ConditionDef::Eq(neighbors(), ExprDef::Literal(2)),
                        ConditionDef::Eq(neighbors(), ExprDef::Literal(3)),
                    ]))),
                ]),
                vec![ActionDef::Clear],
            ),
            rule(
                "birth",
                ConditionDef::all([
                    centre_is("void"),
                    ConditionDef::Eq(neighbors(), ExprDef::Literal(3)),
                ]),
                vec![ActionDef::Become("white".to_owned())],
            ),
        ],
    )
}

/// Grass spreads over uncovered dirt next to it and counts its age up to 3.
/// Covered grass turns back into dirt.
pub fn grass_growth() -> RuleSetDef {
    rule_set(
        "grass_growth",
        &["dirt", "grass"],
        &[("age", 0)],
        vec![
            rule(
                "wither",
                ConditionDef::all([
                    centre_is("grass"),
                    ConditionDef::Not(Box::new(ConditionDef::is(OffsetDef::named("up"), "void"))),
                ]),
                vec![
                    ActionDef::Become("dirt".to_owned()),
                    set("age", ExprDef::Literal(0)),
                ],
            ),
            rule(
                "age",
                ConditionDef::all([
                    centre_is("grass"),
                    ConditionDef::Lt(field("age"), ExprDef::Literal(3)),
                ]),
                vec![set(
                    "age",
                    ExprDef::Add(Box::new(field("age")), Box::new(ExprDef::Literal(1))),
                )],
            ),
            rule(
                "sprout",
                ConditionDef::all([
                    centre_is("dirt"),
                    ConditionDef::is(OffsetDef::named("up"), "void"),
                    ConditionDef::Gt(count("neumann2d", centre_is("grass")), ExprDef::Literal(0)),
                ]),
                vec![
                    ActionDef::Become("grass".to_owned()),
                    set("age", ExprDef::Literal(0)),
                ],
            ),
        ],
    )
}

/// Fire ignites adjacent wood and hay, burns for three ticks, then leaves ash.
pub fn fire_spread() -> RuleSetDef {
    rule_set(
        "fire_spread",
        &["fire", "wood", "hay"],
        &[("heat", 0)],
        vec![
            rule(
                "burn_out",
                ConditionDef::all([
                    centre_is("fire"),
                    ConditionDef::Gt(field("heat"), ExprDef::Literal(2)),
                ]),
                vec![
                    ActionDef::Become("ash".to_owned()),
                    set("heat", ExprDef::Literal(0)),
                ],
            ),
            rule(
                "burn",
                centre_is("fire"),
                vec![set(
                    "heat",
                    ExprDef::Add(Box::new(field("heat")), Box::new(ExprDef::Literal(1))),
                )],
            ),
            rule(
                "ignite",
                ConditionDef::all([
                    ConditionDef::Any(vec![centre_is("wood"), centre_is("hay")]),
                    ConditionDef::Gt(count("neumann3d", centre_is("fire")), ExprDef::Literal(0)),
                ]),
                vec![
                    ActionDef::Become("fire".to_owned()),
                    set("heat", ExprDef::Literal(0)),
                ],
            ),
        ],
    )
}

/// Every sample rule-set.
pub fn all() -> Vec<RuleSetDef> {
    vec![gravity(), game_of_life(), grass_growth(), fire_spread()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_survive_json_round_trip() {
        for def in all() {
            let text = serde_json::to_string(&def).unwrap();
            assert_eq!(RuleSetDef::from_json(&text).unwrap(), def);
        }
    }
}
