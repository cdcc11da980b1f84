//! Walks the predecessor/successor graph on behalf of a [`crate::storage::Storage`].
//!
//! The step-form [`Query`] and the specification-form [`Specification`]
//! share this one evaluator; a step query lowers to the same
//! predecessor/successor primitives a specification's path conditions use.

use crate::error::FactError;
use crate::fact::Reference;
use crate::query::{
    Condition, Direction, Match, PathCondition, ProjectedValue, Projection, Quantifier,
    Specification, Step,
};
use crate::storage::Storage;
use async_recursion::async_recursion;
use std::collections::HashMap;

/// Evaluates a legacy step query starting from `start`.
pub async fn run_query(
    storage: &dyn Storage,
    start: &Reference,
    query: &crate::query::Query,
) -> Result<Vec<Reference>, FactError> {
    walk(storage, vec![start.clone()], &query.steps).await
}

#[async_recursion]
async fn walk(
    storage: &dyn Storage,
    mut set: Vec<Reference>,
    steps: &[Step],
) -> Result<Vec<Reference>, FactError> {
    for step in steps {
        set = apply_step(storage, set, step).await?;
    }
    Ok(set)
}

async fn apply_step(
    storage: &dyn Storage,
    set: Vec<Reference>,
    step: &Step,
) -> Result<Vec<Reference>, FactError> {
    match step {
        Step::PropertyCondition { name, value } => {
            let mut retained = Vec::with_capacity(set.len());
            for r in set {
                let matches = if name == "type" {
                    matches!(value, crate::fact::FieldValue::String(s) if s == &r.fact_type)
                } else {
                    let envelope = storage.get(&r).await?.ok_or_else(|| FactError::NotFound(r.clone()))?;
                    envelope.fact.fields.get(name) == Some(value)
                };
                if matches {
                    retained.push(r);
                }
            }
            Ok(retained)
        }
        Step::Join { direction, role } => {
            let mut out = Vec::new();
            for r in &set {
                match direction {
                    Direction::Predecessor => {
                        let envelope = storage
                            .get(r)
                            .await?
                            .ok_or_else(|| FactError::NotFound(r.clone()))?;
                        if let Some(preds) = envelope.fact.predecessors.get(role) {
                            out.extend(preds.iter().cloned());
                        }
                    }
                    Direction::Successor => {
                        out.extend(storage.successors(r, role).await?);
                    }
                }
            }
            Ok(out)
        }
        Step::Existential { quantifier, steps } => {
            let mut retained = Vec::with_capacity(set.len());
            for r in set {
                let sub = walk(storage, vec![r.clone()], steps).await?;
                let keep = match quantifier {
                    Quantifier::Exists => !sub.is_empty(),
                    Quantifier::NotExists => sub.is_empty(),
                };
                if keep {
                    retained.push(r);
                }
            }
            Ok(retained)
        }
    }
}

/// A single candidate binding of labels to references, grown one [`Match`] at a time.
type Row = HashMap<String, Reference>;

/// Evaluates a specification starting from `given`, returning one projected
/// value per result row.
pub async fn run_specification(
    storage: &dyn Storage,
    given: &[(String, Reference)],
    spec: &Specification,
) -> Result<Vec<ProjectedValue>, FactError> {
    spec.validate()?;
    let initial: Row = given.iter().cloned().collect();
    let rows = eval_matches(storage, vec![initial], &spec.matches).await?;
    let mut projected = Vec::with_capacity(rows.len());
    for row in &rows {
        projected.push(project(storage, row, &spec.projection).await?);
    }
    Ok(projected)
}

#[async_recursion]
async fn eval_matches(
    storage: &dyn Storage,
    rows: Vec<Row>,
    matches: &[Match],
) -> Result<Vec<Row>, FactError> {
    let mut rows = rows;
    for m in matches {
        let mut next = Vec::new();
        for row in &rows {
            for candidate in eval_match_candidates(storage, row, m).await? {
                let mut extended = row.clone();
                extended.insert(m.unknown.clone(), candidate);
                next.push(extended);
            }
        }
        rows = next;
    }
    Ok(rows)
}

/// Computes the references `m.unknown` may bind to, given `row`, after
/// intersecting every `Path` condition and filtering by every existential.
async fn eval_match_candidates(
    storage: &dyn Storage,
    row: &Row,
    m: &Match,
) -> Result<Vec<Reference>, FactError> {
    let mut candidates: Option<Vec<Reference>> = None;
    for condition in &m.conditions {
        match condition {
            Condition::Path(path) => {
                let set = eval_path(storage, row, path, &m.unknown_type).await?;
                candidates = Some(match candidates {
                    None => set,
                    Some(existing) => existing
                        .into_iter()
                        .filter(|r| set.contains(r))
                        .collect(),
                });
            }
            Condition::Existential(_) => {
                // handled in the second pass below, once the full candidate set is known.
            }
        }
    }
    let candidates = candidates.unwrap_or_default();

    let mut retained = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut keep = true;
        for condition in &m.conditions {
            if let Condition::Existential(e) = condition {
                let mut sub_row = row.clone();
                sub_row.insert(m.unknown.clone(), candidate.clone());
                let sub_rows = eval_matches(storage, vec![sub_row], &e.matches).await?;
                let satisfied = !sub_rows.is_empty();
                if satisfied != e.exists {
                    keep = false;
                    break;
                }
            }
        }
        if keep {
            retained.push(candidate);
        }
    }
    Ok(retained)
}

async fn eval_path(
    storage: &dyn Storage,
    row: &Row,
    path: &PathCondition,
    unknown_type: &str,
) -> Result<Vec<Reference>, FactError> {
    let anchor = row
        .get(&path.label_right)
        .ok_or_else(|| FactError::QueryMalformed {
            reason: format!("'{}' is referenced before it is bound", path.label_right),
        })?;
    let mut set = vec![anchor.clone()];
    for role in &path.roles_right {
        let mut next = Vec::new();
        for r in &set {
            let envelope = storage
                .get(r)
                .await?
                .ok_or_else(|| FactError::NotFound(r.clone()))?;
            if let Some(preds) = envelope.fact.predecessors.get(&role.name) {
                next.extend(preds.iter().cloned());
            }
        }
        set = next;
    }
    for role in &path.roles_left {
        let mut next = Vec::new();
        for r in &set {
            next.extend(storage.successors(r, &role.name).await?);
        }
        set = next;
    }
    set.retain(|r| r.fact_type == unknown_type);
    Ok(set)
}

#[async_recursion]
async fn project(
    storage: &dyn Storage,
    row: &Row,
    projection: &Projection,
) -> Result<ProjectedValue, FactError> {
    match projection {
        Projection::Label(label) => Ok(ProjectedValue::Reference(bound(row, label)?)),
        Projection::Tuple(labels) => {
            let mut values = Vec::with_capacity(labels.len());
            for label in labels {
                values.push(ProjectedValue::Reference(bound(row, label)?));
            }
            Ok(ProjectedValue::Tuple(values))
        }
        Projection::Record(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (name, label) in fields {
                values.push((name.clone(), ProjectedValue::Reference(bound(row, label)?)));
            }
            Ok(ProjectedValue::Record(values))
        }
        Projection::Collection(sub_spec) => {
            let given: Vec<(String, Reference)> = sub_spec
                .given
                .iter()
                .map(|(label, _)| bound(row, label).map(|r| (label.clone(), r)))
                .collect::<Result<_, _>>()?;
            let sub_rows = run_specification(storage, &given, sub_spec).await?;
            Ok(ProjectedValue::Collection(sub_rows))
        }
    }
}

fn bound(row: &Row, label: &str) -> Result<Reference, FactError> {
    row.get(label).cloned().ok_or_else(|| FactError::QueryMalformed {
        reason: format!("projection references unbound label '{label}'"),
    })
}
