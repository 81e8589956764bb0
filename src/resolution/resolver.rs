//! Reference resolution.
//!
//! Walks a record, and for every descriptor-designated field keeps canonical
//! identifiers, maps labels to identifiers through a [`ReferenceTable`], and
//! nulls (or drops, inside arrays) anything that yields no identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::descriptor::{FieldDescriptor, RefTarget};
use super::path::FieldPath;
use super::table::ReferenceTable;
use crate::errors::{RefKeeperError, Result};
use crate::types::{ObjectId, Record};

/// How identifiers already present in a record are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierPolicy {
    /// Any well-formed identifier is kept as is.
    #[default]
    Trust,
    /// Identifiers must name an existing row of the right category or
    /// collection; dangling ones are treated as unresolvable.
    Verify,
}

/// Why a field value could not be turned into an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A label in a closed lookup category matched no row.
    UnknownLabel,
    /// A label matched no record (or more than one) of the target collection.
    NoMatchingEntity,
    /// A string that is neither an identifier nor usable as a label.
    NotAnIdentifier,
    /// A well-formed identifier that names nothing.
    DanglingIdentifier,
    /// A number, boolean or object where a reference was expected.
    UnsupportedValue,
    /// An array held by a scalar reference field.
    ExpectedScalar,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::UnknownLabel => "unknown label",
            FailureReason::NoMatchingEntity => "no matching record",
            FailureReason::NotAnIdentifier => "not an identifier",
            FailureReason::DanglingIdentifier => "dangling identifier",
            FailureReason::UnsupportedValue => "unsupported value",
            FailureReason::ExpectedScalar => "array in scalar field",
        };
        f.write_str(text)
    }
}

/// One field value the resolver had to discard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    /// Concrete location, e.g. `educations[1].degree` or `category[2]`.
    pub field: String,
    pub value: Value,
    pub reason: FailureReason,
}

/// The resolver's output: a new record and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub record: Record,
    pub failures: Vec<ResolutionFailure>,
    /// Labels (or embedded ids) replaced by an identifier.
    pub replaced: usize,
    /// Scalar fields set to null.
    pub nulled: usize,
    /// Array elements removed.
    pub dropped: usize,
    pub changed: bool,
}

/// Outcome of classifying one value.
enum Outcome {
    Keep,
    Replace(ObjectId),
    Discard(FailureReason),
}

/// Turns label-or-identifier reference fields into identifiers.
pub struct ReferenceResolver<'a, T: ReferenceTable + ?Sized> {
    table: &'a T,
    policy: IdentifierPolicy,
}

impl<'a, T: ReferenceTable + ?Sized> ReferenceResolver<'a, T> {
    pub fn new(table: &'a T) -> Self {
        Self {
            table,
            policy: IdentifierPolicy::default(),
        }
    }

    pub fn with_policy(table: &'a T, policy: IdentifierPolicy) -> Self {
        Self { table, policy }
    }

    pub fn policy(&self) -> IdentifierPolicy {
        self.policy
    }

    /// Resolves every descriptor-designated field of `record`.
    ///
    /// The input is never modified. Malformed values are soft failures; only
    /// an error from the table aborts, naming the descriptor path.
    pub fn resolve(&self, record: &Record, descriptors: &[FieldDescriptor]) -> Result<Resolution> {
        let mut output = record.clone();
        let mut state = State::default();

        for descriptor in descriptors {
            let path = FieldPath::parse(&descriptor.path);
            path.for_each_slot(&mut output, &mut |location: &str, slot: &mut Value| {
                self.resolve_slot(descriptor, location, slot, &mut state)
            })
            .map_err(|e| RefKeeperError::Resolution {
                path: descriptor.path.clone(),
                source: Box::new(e),
            })?;
        }

        for failure in &state.failures {
            warn!(
                field = %failure.field,
                value = %failure.value,
                reason = %failure.reason,
                "unresolved reference"
            );
        }

        let changed = &output != record;
        Ok(Resolution {
            record: output,
            failures: state.failures,
            replaced: state.replaced,
            nulled: state.nulled,
            dropped: state.dropped,
            changed,
        })
    }

    fn resolve_slot(
        &self,
        descriptor: &FieldDescriptor,
        location: &str,
        slot: &mut Value,
        state: &mut State,
    ) -> Result<()> {
        if slot.is_null() {
            return Ok(());
        }

        if descriptor.is_array {
            let items = match slot.take() {
                Value::Array(items) => items,
                Value::String(s) if s.trim().is_empty() => Vec::new(),
                scalar => vec![scalar],
            };
            let mut kept = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                if is_blank(&item) {
                    state.dropped += 1;
                    continue;
                }
                match self.classify(&descriptor.target, &item)? {
                    Outcome::Keep => kept.push(item),
                    Outcome::Replace(id) => {
                        state.replaced += 1;
                        kept.push(id.to_value());
                    }
                    Outcome::Discard(reason) => {
                        state.dropped += 1;
                        state.fail(format!("{location}[{index}]"), item, reason);
                    }
                }
            }
            *slot = Value::Array(kept);
            return Ok(());
        }

        if is_blank(slot) {
            *slot = Value::Null;
            return Ok(());
        }
        if slot.is_array() {
            let value = slot.take();
            state.nulled += 1;
            state.fail(location.to_string(), value, FailureReason::ExpectedScalar);
            return Ok(());
        }
        match self.classify(&descriptor.target, slot)? {
            Outcome::Keep => {}
            Outcome::Replace(id) => {
                state.replaced += 1;
                *slot = id.to_value();
            }
            Outcome::Discard(reason) => {
                let value = slot.take();
                state.nulled += 1;
                state.fail(location.to_string(), value, reason);
            }
        }
        Ok(())
    }

    fn classify(&self, target: &RefTarget, value: &Value) -> Result<Outcome> {
        if let Some(id) = ObjectId::from_value(value) {
            if self.policy == IdentifierPolicy::Verify && !self.exists(target, &id)? {
                return Ok(Outcome::Discard(FailureReason::DanglingIdentifier));
            }
            // Canonical form is a lowercase hex string.
            return Ok(match value {
                Value::String(s) if *s == id.to_string() => Outcome::Keep,
                _ => Outcome::Replace(id),
            });
        }

        let label = match value {
            Value::String(s) => s.trim(),
            _ => return Ok(Outcome::Discard(FailureReason::UnsupportedValue)),
        };

        match target {
            RefTarget::Lookup {
                category,
                create_missing,
            } => Ok(match self.table.find_or_create(category, label, *create_missing)? {
                Some(id) => Outcome::Replace(id),
                None if *create_missing => Outcome::Discard(FailureReason::NotAnIdentifier),
                None => Outcome::Discard(FailureReason::UnknownLabel),
            }),
            RefTarget::Entity {
                collection,
                match_fields,
            } => {
                if match_fields.is_empty() {
                    return Ok(Outcome::Discard(FailureReason::NotAnIdentifier));
                }
                Ok(match self.table.find_entity(*collection, label, match_fields)? {
                    Some(id) => Outcome::Replace(id),
                    None => Outcome::Discard(FailureReason::NoMatchingEntity),
                })
            }
        }
    }

    fn exists(&self, target: &RefTarget, id: &ObjectId) -> Result<bool> {
        match target {
            RefTarget::Lookup { category, .. } => self.table.lookup_exists(category, id),
            RefTarget::Entity { collection, .. } => self.table.entity_exists(*collection, id),
        }
    }
}

#[derive(Default)]
struct State {
    failures: Vec<ResolutionFailure>,
    replaced: usize,
    nulled: usize,
    dropped: usize,
}

impl State {
    fn fail(&mut self, field: String, value: Value, reason: FailureReason) {
        self.failures.push(ResolutionFailure {
            field,
            value,
            reason,
        });
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
