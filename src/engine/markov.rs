use std::collections::HashMap;

use crate::types::{Context, Digit};

/// Empirical next-digit frequencies per context.
///
/// Counts per context are kept in insertion order so that ties between
/// equally frequent digits always resolve to the digit seen first. The
/// table only grows; for the 10-digit domain the context space is at most
/// 1000 entries, so no eviction is needed. An optional cap stops new
/// contexts from being inserted when set.
pub struct MarkovMemory {
    table: HashMap<Context, Vec<(Digit, u32)>>,
    context_cap: Option<usize>,
}

impl MarkovMemory {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            context_cap: None,
        }
    }

    pub fn with_context_cap(cap: Option<usize>) -> Self {
        Self {
            table: HashMap::new(),
            context_cap: cap,
        }
    }

    /// Increment the occurrence count for `actual` under `context`.
    pub fn record(&mut self, context: &Context, actual: Digit) {
        if !self.table.contains_key(context) {
            if let Some(cap) = self.context_cap {
                if self.table.len() >= cap {
                    return;
                }
            }
        }

        let counts = self.table.entry(*context).or_default();
        match counts.iter_mut().find(|(digit, _)| *digit == actual) {
            Some((_, count)) => *count += 1,
            None => counts.push((actual, 1)),
        }
    }

    /// Most frequent next digit for `context`, or `None` for an unseen
    /// context ("no opinion", not zero).
    pub fn predict(&self, context: &Context) -> Option<Digit> {
        let counts = self.table.get(context)?;
        let mut best: Option<(Digit, u32)> = None;
        for &(digit, count) in counts {
            // Strict comparison keeps the first-inserted digit on ties.
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((digit, count));
            }
        }
        best.map(|(digit, _)| digit)
    }

    pub fn contexts_seen(&self) -> usize {
        self.table.len()
    }
}

impl Default for MarkovMemory {
    fn default() -> Self {
        Self::new()
    }
}
