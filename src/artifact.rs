//! Text form of the function repository.
//!
//! ```text
//! # User-defined functions
//! # ...banner...
//!
//! import polars as pl            <- shared, sorted, deduplicated
//!
//!
//! # @function clean_orders       <- one header block per unit
//! #: Drop rows without a total   <- description lines are escaped
//! # Tags: cleaning, orders
//! # Language: python
//! def clean_orders(df):
//!     return df.drop_nulls("total")
//!
//!
//! # @function monthly_sql
//! # Tags:
//! # Language: sql
//! #| SELECT * FROM orders        <- non-Python bodies are commented out
//! ```
//!
//! Unit boundaries are `# @function` comments in the first column. They are
//! located through the syntax tree, so the same text inside a string literal
//! does not split a unit. Description lines carry their own `#:` prefix, so
//! free text can never read as a boundary or as a `Tags`/`Language` line.

use crate::{errors::Result, parser::ParsedSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const BANNER: &str = "# User-defined functions\n\
                      # Maintained by pyworkbench: every unit starts with a `# @function` header.\n";
pub(crate) const FUNCTION_MARKER: &str = "# @function ";
const TAGS_PREFIX: &str = "# Tags:";
const LANGUAGE_PREFIX: &str = "# Language:";
const DESCRIPTION_PREFIX: &str = "#:";
const FOREIGN_PREFIX: &str = "#|";

/// Language a stored unit is written in
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    Python,
    Other(String),
}

impl Language {
    pub fn is_python(&self) -> bool {
        matches!(self, Language::Python)
    }
}

impl From<&str> for Language {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("python") {
            Language::Python
        } else {
            Language::Other(value.to_lowercase())
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        Language::from(value.as_str())
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => f.write_str("python"),
            Language::Other(name) => f.write_str(name),
        }
    }
}

/// One named unit in the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFunction {
    pub name: String,
    pub code: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub language: Language,
}

/// The repository as a value: shared imports plus ordered units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub imports: BTreeSet<String>,
    pub units: Vec<StoredFunction>,
}

impl Artifact {
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let parsed = ParsedSource::parse_lenient(text)?;
        let starts: Vec<usize> = parsed
            .column_zero_comments()
            .into_iter()
            .filter(|comment| comment.text.starts_with(FUNCTION_MARKER))
            .map(|comment| comment.range.start)
            .collect();
        let preamble_end = starts.first().copied().unwrap_or(text.len());

        let imports = parsed
            .top_level_imports()
            .into_iter()
            .filter(|span| span.range.end <= preamble_end)
            .map(|span| span.text)
            .collect();

        let units = starts
            .iter()
            .enumerate()
            .filter_map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(text.len());
                parse_unit(&text[start..end])
            })
            .collect();

        Ok(Self { imports, units })
    }

    pub fn render(&self) -> String {
        let mut out = String::from(BANNER);
        if !self.imports.is_empty() {
            out.push('\n');
            for import in &self.imports {
                out.push_str(import);
                out.push('\n');
            }
        }
        for unit in &self.units {
            out.push_str("\n\n");
            render_unit(unit, &mut out);
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&StoredFunction> {
        self.units.iter().find(|unit| unit.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<StoredFunction> {
        let index = self.units.iter().position(|unit| unit.name == name)?;
        Some(self.units.remove(index))
    }
}

fn strip_comment<'a>(line: &'a str, prefix: &str) -> &'a str {
    let rest = line.strip_prefix(prefix).unwrap_or(line);
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn parse_unit(segment: &str) -> Option<StoredFunction> {
    let lines: Vec<&str> = segment.lines().collect();
    let name = lines.first()?.strip_prefix(FUNCTION_MARKER)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut header: Vec<&str> = Vec::new();
    let mut tags = BTreeSet::new();
    let mut language = None;
    let mut index = 1;
    while index < lines.len() && lines[index].starts_with('#') {
        let line = lines[index];
        index += 1;
        if let Some(rest) = line.strip_prefix(TAGS_PREFIX) {
            tags = rest
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect();
            if let Some(rest) = lines.get(index).and_then(|l| l.strip_prefix(LANGUAGE_PREFIX)) {
                language = Some(Language::from(rest));
                index += 1;
            }
            break;
        }
        if let Some(rest) = line.strip_prefix(LANGUAGE_PREFIX) {
            language = Some(Language::from(rest));
            break;
        }
        header.push(line);
    }

    // Hand-written headers may use plain `# ` description lines
    let description = header
        .iter()
        .map(|line| {
            if line.starts_with(DESCRIPTION_PREFIX) {
                strip_comment(line, DESCRIPTION_PREFIX)
            } else {
                strip_comment(line, "#")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let language = language.unwrap_or_default();

    let mut body = &lines[index..];
    while body.first().is_some_and(|l| l.trim().is_empty()) {
        body = &body[1..];
    }
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body = &body[..body.len() - 1];
    }
    let code = if language.is_python() {
        body.join("\n")
    } else {
        body.iter()
            .map(|line| {
                let rest = line.strip_prefix(FOREIGN_PREFIX).unwrap_or(line);
                rest.strip_prefix(' ').unwrap_or(rest)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    Some(StoredFunction {
        name,
        code,
        description: description.trim().to_string(),
        tags,
        language,
    })
}

fn render_unit(unit: &StoredFunction, out: &mut String) {
    out.push_str(FUNCTION_MARKER);
    out.push_str(&unit.name);
    out.push('\n');

    for line in unit.description.trim().lines() {
        out.push_str(DESCRIPTION_PREFIX);
        if !line.trim().is_empty() {
            out.push(' ');
            out.push_str(line);
        }
        out.push('\n');
    }

    out.push_str(TAGS_PREFIX);
    if !unit.tags.is_empty() {
        out.push(' ');
        out.push_str(&unit.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    out.push('\n');
    out.push_str(&format!("{LANGUAGE_PREFIX} {}\n", unit.language));

    for line in unit.code.trim_end().lines() {
        if !unit.language.is_python() {
            out.push_str(FOREIGN_PREFIX);
            if !line.is_empty() {
                out.push(' ');
            }
        }
        out.push_str(line);
        out.push('\n');
    }
}
