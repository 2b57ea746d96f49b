//! Recalculation coordinator.
//!
//! An edit moves through `Validating -> Writing -> Scheduling -> Evaluating ->
//! Committed`, or ends in `Rejected`. Nothing is written before `Writing`, and
//! a rejection at `Scheduling` restores the previous raw value.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use planline_engine::engine::{AffectedSet, CellKey, DependencyGraph, RawValue, Role, SheetName};

use super::diff::DiffMap;
use super::eval::{EvalContext, Externals};
use super::state::SheetState;
use crate::error::{CoreError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditPhase {
    Validating,
    Writing,
    Scheduling,
    Evaluating,
    Committed,
    Rejected,
}

impl EditPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EditPhase::Validating => "validating",
            EditPhase::Writing => "writing",
            EditPhase::Scheduling => "scheduling",
            EditPhase::Evaluating => "evaluating",
            EditPhase::Committed => "committed",
            EditPhase::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EditPhase::Committed | EditPhase::Rejected)
    }
}

impl fmt::Display for EditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the phase of one edit.
struct Phase<'a> {
    sheet: SheetName,
    cell: &'a str,
    current: EditPhase,
}

impl<'a> Phase<'a> {
    fn start(sheet: SheetName, cell: &'a str) -> Self {
        tracing::trace!(sheet = %sheet, cell, phase = %EditPhase::Validating, "edit phase");
        Phase {
            sheet,
            cell,
            current: EditPhase::Validating,
        }
    }

    fn enter(&mut self, next: EditPhase) {
        debug_assert!(!self.current.is_terminal());
        tracing::trace!(
            sheet = %self.sheet,
            cell = self.cell,
            from = %self.current,
            phase = %next,
            "edit phase"
        );
        self.current = next;
    }

    fn reject(&mut self, err: CoreError) -> CoreError {
        self.enter(EditPhase::Rejected);
        err
    }
}

impl SheetState {
    /// Apply one raw-value edit and recompute everything that depends on it.
    ///
    /// `externals` is the current snapshot of other sheets' values; cells
    /// reading a value that changed since the last evaluation are refreshed in
    /// the same pass. The returned diff never contains the edited cell.
    pub fn apply_edit(
        &mut self,
        ctx: &EvalContext<'_>,
        key: &str,
        value: Option<RawValue>,
        role: Role,
        externals: Externals,
    ) -> Result<DiffMap> {
        let sheet = self.sheet();
        let mut phase = Phase::start(sheet, key);
        let idx = self.check_edit(key, role).map_err(|e| phase.reject(e))?;

        phase.enter(EditPhase::Writing);
        let template = Arc::clone(self.template());
        let graph = template.graph();
        let edited = &template.cells()[idx].key;
        let previous = self.write_raw_at(idx, value);

        let seeds = self.changed_external_readers(&externals);
        let affected = graph.affected_set(edited);
        if affected.is_empty() && seeds.is_empty() {
            self.replace_externals(externals);
            phase.enter(EditPhase::Committed);
            tracing::debug!(sheet = %sheet, cell = key, changed = 0, "edit applied");
            return Ok(DiffMap::new());
        }

        phase.enter(EditPhase::Scheduling);
        let affected = if seeds.is_empty() {
            affected
        } else {
            affected.union(graph.refresh_set(&seeds), graph)
        };
        let order = match schedule(graph, &affected) {
            Ok(order) => order,
            Err(cycle) => {
                self.write_raw_at(idx, previous);
                return Err(phase.reject(CoreError::CycleDetected { sheet, cycle }));
            }
        };
        self.replace_externals(externals);

        phase.enter(EditPhase::Evaluating);
        let diff = self.evaluate_in_order(ctx, &order);

        phase.enter(EditPhase::Committed);
        tracing::debug!(
            sheet = %sheet,
            cell = key,
            affected = order.len(),
            changed = diff.len(),
            "edit applied"
        );
        Ok(diff)
    }

    /// Apply edits in order as single edits and merge their diffs.
    ///
    /// Every edit is validated before any is written, so a rejected bulk
    /// request leaves the sheet untouched.
    pub fn apply_bulk(
        &mut self,
        ctx: &EvalContext<'_>,
        edits: &[(String, Option<RawValue>)],
        role: Role,
        externals: Externals,
    ) -> Result<DiffMap> {
        for (key, _) in edits {
            if let Err(err) = self.check_edit(key, role) {
                tracing::trace!(sheet = %self.sheet(), cell = %key, phase = %EditPhase::Rejected, "bulk edit");
                return Err(err);
            }
        }

        let mut diff = DiffMap::new();
        for (key, value) in edits {
            diff.merge(self.apply_edit(ctx, key, value.clone(), role, externals.clone())?);
        }
        Ok(diff)
    }

    /// Re-evaluate the cells reading other sheets' values that changed since
    /// the last evaluation.
    pub fn refresh_externals(&mut self, ctx: &EvalContext<'_>, externals: Externals) -> Result<DiffMap> {
        let seeds = self.changed_external_readers(&externals);
        if seeds.is_empty() {
            self.replace_externals(externals);
            return Ok(DiffMap::new());
        }

        let template = Arc::clone(self.template());
        let graph = template.graph();
        let order = schedule(graph, &graph.refresh_set(&seeds)).map_err(|cycle| CoreError::CycleDetected {
            sheet: self.sheet(),
            cycle,
        })?;
        self.replace_externals(externals);
        let diff = self.evaluate_in_order(ctx, &order);
        tracing::debug!(sheet = %self.sheet(), changed = diff.len(), "cross-sheet values refreshed");
        Ok(diff)
    }

    /// Local cells reading an external value that differs from the last snapshot.
    fn changed_external_readers(&self, externals: &Externals) -> Vec<CellKey> {
        let mut seeds = BTreeSet::new();
        for (sheet, key) in self.template().external_refs() {
            let entry = (*sheet, key.clone());
            if self.externals().get(&entry) != externals.get(&entry) {
                seeds.extend(self.template().readers_of(*sheet, key).iter().cloned());
            }
        }
        seeds.into_iter().collect()
    }

    fn evaluate_in_order(&mut self, ctx: &EvalContext<'_>, order: &[CellKey]) -> DiffMap {
        let mut diff = DiffMap::new();
        for key in order {
            let Some(idx) = self.template().index_of(key) else {
                continue;
            };
            if self.template().cells()[idx].is_input() {
                continue;
            }
            let before = self.reported_at(idx);
            let value = self.evaluate_at(ctx, idx);
            self.set_computed_at(idx, Some(value));
            let after = self.reported_at(idx);
            if after != before {
                diff.insert(key.clone(), after);
            }
        }
        diff
    }
}

/// Evaluation order for an affected set; the cycle members if there is none.
fn schedule(
    graph: &DependencyGraph,
    affected: &AffectedSet,
) -> std::result::Result<Vec<CellKey>, Vec<CellKey>> {
    if affected.is_cyclic() {
        return Err(affected.keys().to_vec());
    }
    graph.topological_order(affected)
}
