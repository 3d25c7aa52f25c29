use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Same node; only which variable references carry a `$` differs.
    VariableFormatting,
    /// A decision came back as a jump, as plain text, without its prompt, or
    /// without its option descriptions.
    DecisionCollapsed,
    /// Node kind, branch kind or child count changed.
    StructuralShift,
    Unclassified,
    /// Present in the original only.
    Missing,
    /// Present in the roundtrip only.
    Extra,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::VariableFormatting => "variable_formatting",
            Category::DecisionCollapsed => "decision_collapsed",
            Category::StructuralShift => "structural_shift",
            Category::Unclassified => "unclassified",
            Category::Missing => "missing",
            Category::Extra => "extra",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub category: Category,
    /// Path into the original tree, e.g. `[3].branches[0].body[1]`.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub roundtrip: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct FidelityReport {
    pub divergences: Vec<Divergence>,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    clean: bool,
    counts: BTreeMap<Category, usize>,
    divergences: &'a [Divergence],
}

impl FidelityReport {
    pub fn new(divergences: Vec<Divergence>) -> Self {
        Self { divergences }
    }

    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty()
    }

    pub fn counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.divergences {
            *counts.entry(d.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, category: Category) -> usize {
        self.divergences
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportJson {
            clean: self.is_clean(),
            counts: self.counts(),
            divergences: &self.divergences,
        })
    }
}

impl fmt::Display for FidelityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "roundtrip is clean");
        }
        let counts: Vec<String> = self
            .counts()
            .iter()
            .map(|(category, n)| format!("{n} {category}"))
            .collect();
        writeln!(
            f,
            "{} divergences ({})",
            self.divergences.len(),
            counts.join(", ")
        )?;
        for d in &self.divergences {
            write!(f, "  {} at {}", d.category, d.location)?;
            match (&d.original, &d.roundtrip) {
                (Some(a), Some(b)) => writeln!(f, ": {a} => {b}")?,
                (Some(a), None) => writeln!(f, ": {a}")?,
                (None, Some(b)) => writeln!(f, ": {b}")?,
                (None, None) => writeln!(f)?,
            }
        }
        Ok(())
    }
}
