use serde_json::Value;

use crate::errors::Result;
use crate::types::Record;

/// A parsed dot-separated, array-aware field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Calls `f` on every existing terminal slot the path addresses.
    ///
    /// The first argument is the concrete location (`educations[1].degree`).
    /// Missing keys, nulls and scalars on intermediate segments end the walk
    /// for that branch without calling `f`.
    pub fn for_each_slot<F>(&self, record: &mut Record, f: &mut F) -> Result<()>
    where
        F: FnMut(&str, &mut Value) -> Result<()>,
    {
        visit_map(record, &self.segments, "", f)
    }

    /// Read-only walk returning every terminal value with its location.
    pub fn collect<'a>(&self, record: &'a Record) -> Vec<(String, &'a Value)> {
        let mut out = Vec::new();
        collect_map(record, &self.segments, "", &mut out);
        out
    }

    /// Every non-blank string reachable through the path, with terminal
    /// arrays flattened. Used for duplicate and uniqueness checks.
    pub fn collect_strings(&self, record: &Record) -> Vec<String> {
        let mut out = Vec::new();
        for (_, value) in self.collect(record) {
            match value {
                Value::Array(items) => out.extend(items.iter().filter_map(scalar_text)),
                other => out.extend(scalar_text(other)),
            }
        }
        out
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn join(location: &str, key: &str) -> String {
    if location.is_empty() {
        key.to_string()
    } else {
        format!("{location}.{key}")
    }
}

fn visit_map<F>(map: &mut Record, segments: &[String], location: &str, f: &mut F) -> Result<()>
where
    F: FnMut(&str, &mut Value) -> Result<()>,
{
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    let Some(value) = map.get_mut(head) else {
        return Ok(());
    };
    let location = join(location, head);
    if rest.is_empty() {
        return f(&location, value);
    }
    visit_value(value, rest, &location, f)
}

fn visit_value<F>(value: &mut Value, rest: &[String], location: &str, f: &mut F) -> Result<()>
where
    F: FnMut(&str, &mut Value) -> Result<()>,
{
    match value {
        Value::Object(map) => visit_map(map, rest, location, f),
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                visit_value(item, rest, &format!("{location}[{index}]"), f)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn collect_map<'a>(
    map: &'a Record,
    segments: &[String],
    location: &str,
    out: &mut Vec<(String, &'a Value)>,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = map.get(head) else {
        return;
    };
    let location = join(location, head);
    if rest.is_empty() {
        out.push((location, value));
        return;
    }
    collect_value(value, rest, &location, out);
}

fn collect_value<'a>(
    value: &'a Value,
    rest: &[String],
    location: &str,
    out: &mut Vec<(String, &'a Value)>,
) {
    match value {
        Value::Object(map) => collect_map(map, rest, location, out),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_value(item, rest, &format!("{location}[{index}]"), out);
            }
        }
        _ => {}
    }
}
