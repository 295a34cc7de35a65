// src/engine/projection.rs

//! Post-run projections: pure functions from a task's content to updates on
//! the subject's own fields.
//!
//! A projection that cannot make sense of the content returns no updates.
//! It never fails the run.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::model::{CatalogFile, ProjectionKind};
use crate::errors::{Result, SectionDagError};

/// One field write on the subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectUpdate {
    pub field: String,
    pub value: Value,
}

impl SubjectUpdate {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub trait Projection: Send + Sync {
    fn project(&self, content: &str) -> Vec<SubjectUpdate>;
}

/// Copies the content verbatim into `field`.
#[derive(Debug, Clone)]
pub struct PromoteContent {
    field: String,
}

impl PromoteContent {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Projection for PromoteContent {
    fn project(&self, content: &str) -> Vec<SubjectUpdate> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        vec![SubjectUpdate::new(self.field.clone(), content)]
    }
}

/// Score and verdict label from a verdict write-up.
#[derive(Debug, Clone)]
pub struct VerdictProjection {
    score: Regex,
}

/// Checked in this order; longer labels first so "STRONG PURSUE" wins over
/// "PURSUE".
const VERDICT_LABELS: [&str; 4] = ["STRONG PURSUE", "HARD PASS", "PURSUE", "PASS"];

impl VerdictProjection {
    pub fn new() -> Result<Self> {
        Ok(Self {
            score: compile(r"Total Score[:\s*]*(\d+)\s*/\s*100")?,
        })
    }
}

impl Projection for VerdictProjection {
    fn project(&self, content: &str) -> Vec<SubjectUpdate> {
        let mut updates = Vec::new();

        if let Some(score) = self
            .score
            .captures(content)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            updates.push(SubjectUpdate::new("score", score));
        }

        let upper = content.to_uppercase();
        if let Some(label) = VERDICT_LABELS.iter().find(|l| upper.contains(*l)) {
            updates.push(SubjectUpdate::new("verdict", *label));
        }

        updates
    }
}

/// Weekly hours as a single integer, from an embedded `{"hours": N}` object
/// or from `N hours` / `A-B hours` in prose.
#[derive(Debug, Clone)]
pub struct HoursProjection {
    field: String,
    json: Regex,
    range: Regex,
    single: Regex,
}

impl HoursProjection {
    pub fn new(field: impl Into<String>) -> Result<Self> {
        Ok(Self {
            field: field.into(),
            json: compile(r"(?s)\{.*\}")?,
            range: compile(r"(?i)(\d+)\s*(?:-|–|to)\s*(\d+)\s*(?:hours|hrs|h\b)")?,
            single: compile(r"(?i)(\d+)\s*(?:hours|hrs|h\b)")?,
        })
    }

    fn from_json(&self, content: &str) -> Option<u64> {
        let blob = self.json.find(content)?;
        let value: Value = serde_json::from_str(blob.as_str()).ok()?;
        let hours = value.get("hours")?;
        hours
            .as_u64()
            .or_else(|| hours.as_f64().filter(|h| *h >= 0.0).map(|h| h.round() as u64))
    }
}

impl Projection for HoursProjection {
    fn project(&self, content: &str) -> Vec<SubjectUpdate> {
        let hours = self
            .from_json(content)
            .or_else(|| {
                self.range
                    .captures(content)
                    .and_then(|c| range_or_single(c.get(1), c.get(2)))
            })
            .or_else(|| {
                self.single
                    .captures(content)
                    .and_then(|c| range_or_single(c.get(1), None))
            });

        match hours {
            Some(h) => vec![SubjectUpdate::new(self.field.clone(), h)],
            None => {
                debug!(field = %self.field, "no hours value found in content");
                Vec::new()
            }
        }
    }
}

/// A user-supplied projection function.
pub struct FnProjection<F> {
    f: F,
}

impl<F> FnProjection<F>
where
    F: Fn(&str) -> Vec<SubjectUpdate> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Projection for FnProjection<F>
where
    F: Fn(&str) -> Vec<SubjectUpdate> + Send + Sync,
{
    fn project(&self, content: &str) -> Vec<SubjectUpdate> {
        (self.f)(content)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        SectionDagError::ConfigError(format!("invalid projection pattern {pattern:?}: {e}"))
    })
}

/// Midpoint of `a-b`, or `a` alone. Numbers that do not fit a `u64` yield
/// nothing.
fn range_or_single(a: Option<regex::Match<'_>>, b: Option<regex::Match<'_>>) -> Option<u64> {
    let a: u64 = a?.as_str().parse().ok()?;
    match b {
        Some(b) => {
            let b: u64 = b.as_str().parse().ok()?;
            Some(a / 2 + b / 2 + (a % 2 + b % 2) / 2)
        }
        None => Some(a),
    }
}

/// Task key -> projections, in registration order.
#[derive(Clone, Default)]
pub struct ProjectionTable {
    entries: Vec<(String, Arc<dyn Projection>)>,
}

impl fmt::Debug for ProjectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.entries.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ProjectionTable")
            .field("tasks", &keys)
            .finish()
    }
}

impl ProjectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in projections declared in `[[projection]]`.
    pub fn from_catalog_file(cfg: &CatalogFile) -> Result<Self> {
        let mut table = Self::new();
        for p in cfg.projection.iter() {
            match &p.kind {
                ProjectionKind::Promote { field } => {
                    table.register(&p.task, PromoteContent::new(field.clone()));
                }
                ProjectionKind::Verdict => {
                    table.register(&p.task, VerdictProjection::new()?);
                }
                ProjectionKind::Hours { field } => {
                    table.register(&p.task, HoursProjection::new(field.clone())?);
                }
            }
        }
        Ok(table)
    }

    pub fn register(&mut self, task: impl Into<String>, projection: impl Projection + 'static) {
        self.entries.push((task.into(), Arc::new(projection)));
    }

    pub fn register_fn<F>(&mut self, task: impl Into<String>, f: F)
    where
        F: Fn(&str) -> Vec<SubjectUpdate> + Send + Sync + 'static,
    {
        self.register(task, FnProjection::new(f));
    }

    pub fn has(&self, task: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == task)
    }

    /// Every update produced for `task`'s content.
    pub fn apply(&self, task: &str, content: &str) -> Vec<SubjectUpdate> {
        self.entries
            .iter()
            .filter(|(k, _)| k == task)
            .flat_map(|(_, p)| p.project(content))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
