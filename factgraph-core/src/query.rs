//! The query model: the legacy step form and the current specification form.
//!
//! Both describe the same underlying walk over the predecessor/successor
//! graph; [`crate::executor`] evaluates either against a [`crate::storage::Storage`].

use crate::error::FactError;
use crate::fact::{FieldValue, Reference};
use std::collections::{HashMap, HashSet};

/// A label naming an unknown bound during specification evaluation.
pub type Label = String;

/// Which direction a [`Step::Join`] or path hop walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Follow a fact's own predecessor list for `role`.
    Predecessor,
    /// Follow the reverse edge: every fact whose `predecessors[role]` contains the current fact.
    Successor,
}

/// Whether an [`Step::Existential`] retains or drops facts with a non-empty sub-walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantifier {
    /// Retain facts whose sub-walk is non-empty.
    Exists,
    /// Retain facts whose sub-walk is empty.
    NotExists,
}

/// One step of a legacy step-form query.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Filter the current set to facts where `fields[name] == value`.
    PropertyCondition {
        /// Field name to test. `"type"` is the only legal name in authorization contexts.
        name: String,
        /// Expected value.
        value: FieldValue,
    },
    /// Walk from each fact in the current set to its predecessors or successors along `role`.
    Join {
        /// Walk direction.
        direction: Direction,
        /// Role name.
        role: String,
    },
    /// Retain or drop facts based on the (non-)emptiness of a sub-walk.
    Existential {
        /// Exists or NotExists.
        quantifier: Quantifier,
        /// The sub-walk evaluated from each candidate fact.
        steps: Vec<Step>,
    },
}

/// A sequence of [`Step`]s evaluated from a single starting fact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// The steps, applied in order.
    pub steps: Vec<Step>,
}

impl Query {
    /// An empty query: its result is just the starting fact.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a property filter.
    pub fn property(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.steps.push(Step::PropertyCondition {
            name: name.into(),
            value,
        });
        self
    }

    /// Appends a join.
    pub fn join(mut self, direction: Direction, role: impl Into<String>) -> Self {
        self.steps.push(Step::Join {
            direction,
            role: role.into(),
        });
        self
    }

    /// Appends an existential condition.
    pub fn existential(mut self, quantifier: Quantifier, steps: Vec<Step>) -> Self {
        self.steps.push(Step::Existential { quantifier, steps });
        self
    }
}

/// One predecessor hop in a [`PathCondition`], with the type expected at that position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    /// Role name.
    pub name: String,
    /// The fact type expected at the predecessor end of this role.
    pub predecessor_type: String,
}

impl Role {
    /// Constructs a role hop.
    pub fn new(name: impl Into<String>, predecessor_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predecessor_type: predecessor_type.into(),
        }
    }
}

/// Walks `roles_right` as predecessor steps from an already-bound label, then
/// `roles_left` as successor steps, binding the result to `unknown`.
#[derive(Clone, Debug, PartialEq)]
pub struct PathCondition {
    /// Predecessor-direction hops, walked first.
    pub roles_right: Vec<Role>,
    /// The already-bound label this path anchors on.
    pub label_right: Label,
    /// Successor-direction hops, walked after `roles_right`.
    pub roles_left: Vec<Role>,
}

impl PathCondition {
    /// True if this path makes at least one successor-direction hop.
    pub fn is_successor_path(&self) -> bool {
        !self.roles_left.is_empty()
    }
}

/// A condition attached to a [`Match`]: either the anchoring path, or a
/// nested existential sub-specification.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Anchors or extends the binding for the enclosing match's unknown.
    Path(PathCondition),
    /// Retains or drops the current bindings by non-emptiness of a sub-match set.
    Existential(ExistentialCondition),
}

/// A nested existential condition: `exists` or `not exists` some tuple
/// satisfying `matches`, evaluated with the enclosing bindings plus the
/// match's own unknown in scope.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistentialCondition {
    /// `true` for `exists`, `false` for `not exists`.
    pub exists: bool,
    /// The sub-matches to evaluate.
    pub matches: Vec<Match>,
}

/// Binds `unknown` by evaluating `conditions` against the current environment.
/// The first condition must be a [`Condition::Path`] (the anchor).
#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    /// The label this match binds.
    pub unknown: Label,
    /// The fact type `unknown` is expected to have once bound.
    pub unknown_type: String,
    /// Conditions evaluated in order; the first must anchor the match.
    pub conditions: Vec<Condition>,
}

impl Match {
    /// Whether any condition of this match (including nested existentials)
    /// makes a successor-direction hop.
    pub fn has_successor_path(&self) -> bool {
        self.conditions.iter().any(|c| match c {
            Condition::Path(p) => p.is_successor_path(),
            Condition::Existential(e) => e.matches.iter().any(Match::has_successor_path),
        })
    }
}

/// The shape of a specification's output: a label, a tuple/record of labels,
/// or a nested specification producing a lazy sub-collection.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// Project a single bound label as its reference.
    Label(Label),
    /// Project several labels as an ordered tuple.
    Tuple(Vec<Label>),
    /// Project several labels as a named record.
    Record(Vec<(String, Label)>),
    /// Project a nested specification evaluated against the current bindings.
    Collection(Box<Specification>),
}

/// A reusable, compilable query with labeled unknowns.
#[derive(Clone, Debug, PartialEq)]
pub struct Specification {
    /// Starting labels and their expected types, bound by the caller.
    pub given: Vec<(Label, String)>,
    /// Matches evaluated in order; each extends the binding environment.
    pub matches: Vec<Match>,
    /// How to project the final bindings into a result.
    pub projection: Projection,
}

impl Specification {
    /// True if any match (including nested existentials) makes a successor-direction hop.
    pub fn has_successor_path(&self) -> bool {
        self.matches.iter().any(Match::has_successor_path)
    }

    /// Validates the specification per §4.3: an unknown must not be
    /// referenced before it is bound, a path must not anchor on itself, and
    /// a role's declared predecessor type must agree with the type observed
    /// at the position it is walked from (checked for the first hop of each
    /// path; later hops are a run-time concern of the executor).
    pub fn validate(&self) -> Result<(), FactError> {
        let mut bound: HashMap<Label, String> = self.given.iter().cloned().collect();
        let mut seen_unknowns: HashSet<Label> = bound.keys().cloned().collect();
        for m in &self.matches {
            validate_match(m, &mut bound, &mut seen_unknowns)?;
        }
        validate_projection(&self.projection, &bound)
    }
}

fn validate_match(
    m: &Match,
    bound: &mut HashMap<Label, String>,
    seen: &mut HashSet<Label>,
) -> Result<(), FactError> {
    if m.conditions.is_empty() {
        return Err(FactError::QueryMalformed {
            reason: format!("match for '{}' has no conditions", m.unknown),
        });
    }
    match &m.conditions[0] {
        Condition::Path(p) => validate_path_anchor(&m.unknown, p, bound)?,
        Condition::Existential(_) => {
            return Err(FactError::QueryMalformed {
                reason: format!(
                    "match for '{}' must start with a path condition",
                    m.unknown
                ),
            })
        }
    }
    for c in &m.conditions {
        if let Condition::Existential(e) = c {
            let mut nested_bound = bound.clone();
            nested_bound.insert(m.unknown.clone(), m.unknown_type.clone());
            let mut nested_seen = seen.clone();
            nested_seen.insert(m.unknown.clone());
            for nm in &e.matches {
                validate_match(nm, &mut nested_bound, &mut nested_seen)?;
            }
        }
    }
    bound.insert(m.unknown.clone(), m.unknown_type.clone());
    seen.insert(m.unknown.clone());
    Ok(())
}

fn validate_path_anchor(
    unknown: &str,
    path: &PathCondition,
    bound: &HashMap<Label, String>,
) -> Result<(), FactError> {
    if path.label_right == unknown {
        return Err(FactError::QueryMalformed {
            reason: format!("path condition for '{unknown}' anchors on itself"),
        });
    }
    let bound_type = bound.get(&path.label_right).ok_or_else(|| FactError::QueryMalformed {
        reason: format!(
            "'{}' is referenced before it is bound",
            path.label_right
        ),
    })?;
    if let Some(first) = path.roles_right.first() {
        if &first.predecessor_type != bound_type {
            return Err(FactError::QueryMalformed {
                reason: format!(
                    "role '{}' expects predecessor type '{}' but '{}' is bound as '{}'",
                    first.name, first.predecessor_type, path.label_right, bound_type
                ),
            });
        }
    }
    Ok(())
}

fn validate_projection(
    projection: &Projection,
    bound: &HashMap<Label, String>,
) -> Result<(), FactError> {
    let check = |label: &str| -> Result<(), FactError> {
        if bound.contains_key(label) {
            Ok(())
        } else {
            Err(FactError::QueryMalformed {
                reason: format!("projection references unbound label '{label}'"),
            })
        }
    };
    match projection {
        Projection::Label(l) => check(l),
        Projection::Tuple(ls) => ls.iter().try_for_each(|l| check(l)),
        Projection::Record(fs) => fs.iter().try_for_each(|(_, l)| check(l)),
        Projection::Collection(spec) => spec.validate(),
    }
}

/// One result row produced by [`crate::executor::run_specification`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProjectedValue {
    /// A single bound reference.
    Reference(Reference),
    /// An ordered tuple of projected values.
    Tuple(Vec<ProjectedValue>),
    /// A named record of projected values.
    Record(Vec<(String, ProjectedValue)>),
    /// A lazily-produced nested collection.
    Collection(Vec<ProjectedValue>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(label_right: &str, role: &str, ty: &str) -> Condition {
        Condition::Path(PathCondition {
            roles_right: vec![Role::new(role, ty)],
            label_right: label_right.to_owned(),
            roles_left: vec![],
        })
    }

    #[test]
    fn rejects_unbound_anchor() {
        let spec = Specification {
            given: vec![],
            matches: vec![Match {
                unknown: "list".into(),
                unknown_type: "List".into(),
                conditions: vec![anchor("task", "list", "List")],
            }],
            projection: Projection::Label("list".into()),
        };
        assert!(matches!(spec.validate(), Err(FactError::QueryMalformed { .. })));
    }

    #[test]
    fn rejects_self_anchor() {
        let spec = Specification {
            given: vec![("task".into(), "Task".into())],
            matches: vec![Match {
                unknown: "task".into(),
                unknown_type: "Task".into(),
                conditions: vec![anchor("task", "list", "List")],
            }],
            projection: Projection::Label("task".into()),
        };
        assert!(matches!(spec.validate(), Err(FactError::QueryMalformed { .. })));
    }

    #[test]
    fn accepts_well_formed_specification() {
        let spec = Specification {
            given: vec![("task".into(), "Task".into())],
            matches: vec![Match {
                unknown: "list".into(),
                unknown_type: "List".into(),
                conditions: vec![anchor("task", "list", "Task")],
            }],
            projection: Projection::Label("list".into()),
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn has_successor_path_detects_nested_existentials() {
        let inner = Match {
            unknown: "done".into(),
            unknown_type: "TaskComplete".into(),
            conditions: vec![Condition::Path(PathCondition {
                roles_right: vec![],
                label_right: "task".into(),
                roles_left: vec![Role::new("task", "Task")],
            })],
        };
        let outer = Match {
            unknown: "task".into(),
            unknown_type: "Task".into(),
            conditions: vec![
                anchor("list", "list", "List"),
                Condition::Existential(ExistentialCondition {
                    exists: false,
                    matches: vec![inner],
                }),
            ],
        };
        assert!(outer.has_successor_path());
    }
}
