//! The staged upgrade pipeline: an ordered list of named steps plus an
//! inclusive index range selecting which of them actually run.
//!
//! Resumability is the whole point: every step is individually re-runnable,
//! so after a failure at step k the operator fixes the cause and reruns with
//! `-s k`. A range whose start exceeds its stop skips every step; that is
//! documented behavior, not an error.

use anyhow::{Context, Result};

/// Inclusive range of step indices to execute.
#[derive(Debug, Clone, Copy)]
pub struct StepRange {
    pub start: usize,
    pub stop: usize,
}

impl StepRange {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// Range covering every step of a registry with `len` steps.
    pub fn all(len: usize) -> Self {
        Self {
            start: 0,
            stop: len.saturating_sub(1),
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.stop
    }
}

/// A single named upgrade step.
pub struct Step {
    pub index: usize,
    pub name: &'static str,
    action: Box<dyn FnMut() -> Result<()>>,
}

/// Ordered catalog of upgrade steps. Insertion order is execution order and
/// indices are contiguous from 0.
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step; its index is its position in the registry.
    pub fn register(&mut self, name: &'static str, action: impl FnMut() -> Result<()> + 'static) {
        let index = self.steps.len();
        self.steps.push(Step {
            index,
            name,
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Run every step whose index falls inside `range`, in order.
    ///
    /// Steps outside the range get a skipped notice. The first failing step
    /// aborts the run; nothing after it executes.
    pub fn run(&mut self, range: StepRange) -> Result<()> {
        for step in &mut self.steps {
            if !range.contains(step.index) {
                println!("step {}: {} (skipped)", step.index, step.name);
                continue;
            }
            println!("step {}: {}", step.index, step.name);
            (step.action)()
                .with_context(|| format!("step {} ({}) failed", step.index, step.name))?;
        }
        Ok(())
    }
}
