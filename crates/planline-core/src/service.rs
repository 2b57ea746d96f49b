//! Recompute API for many users.
//!
//! A [`Workbook`] keeps one session per `(user, sheet)`. Edits to the same
//! session are serialized by its state lock; different sessions run in
//! parallel. The raw value is saved after the state lock is released, under a
//! persist lock taken before the release, so saves for one sheet happen in
//! edit order without holding the state across I/O.
//!
//! Cross-sheet values are read while the reader's state lock is held, so an
//! edit always evaluates against sources at least as new as any edit
//! committed before it. Locks are taken from reader to source; sheet
//! references are acyclic, so that order never loops.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use planline_engine::engine::{Catalog, Cell, CellKey, RawValue, Role, SheetName, SheetTemplate};

use crate::error::{CoreError, Result};
use crate::params::ParameterLookup;
use crate::sheet::{DiffMap, EvalContext, Externals, SheetState};
use crate::storage::{RawValueStore, SheetDocument, StoreError};

pub const DEFAULT_MAX_SAVE_ATTEMPTS: usize = 3;

struct Session {
    template: Arc<SheetTemplate>,
    state: Mutex<SheetState>,
    persist: Mutex<()>,
}

pub struct Workbook {
    catalog: Arc<Catalog>,
    params: Arc<dyn ParameterLookup>,
    store: Arc<dyn RawValueStore>,
    sessions: DashMap<(String, SheetName), Arc<Session>>,
    max_save_attempts: usize,
}

impl Workbook {
    pub fn new(
        catalog: Arc<Catalog>,
        params: Arc<dyn ParameterLookup>,
        store: Arc<dyn RawValueStore>,
    ) -> Self {
        Workbook {
            catalog,
            params,
            store,
            sessions: DashMap::new(),
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }

    /// Attempts per save before the session is given up. At least one.
    pub fn with_max_save_attempts(mut self, attempts: usize) -> Self {
        self.max_save_attempts = attempts.max(1);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Apply one edit and return the cells whose value changed.
    pub fn apply_edit(
        &self,
        user: &str,
        sheet: SheetName,
        key: &str,
        value: Option<RawValue>,
        role: Role,
    ) -> Result<DiffMap> {
        let session = self.session(user, sheet)?;

        let (diff, pending, _persist) = {
            let mut state = session.state.lock();
            let externals = self.externals(user, &session.template)?;
            let diff = state.apply_edit(&self.ctx(), key, value, role, externals)?;
            let pending = pending_saves(&state, [key]);
            (diff, pending, session.persist.lock())
        };

        self.persist(user, sheet, &pending)?;
        Ok(diff)
    }

    /// Apply edits in order; the union of their diffs, last value winning.
    pub fn apply_bulk(
        &self,
        user: &str,
        sheet: SheetName,
        edits: &[(String, Option<RawValue>)],
        role: Role,
    ) -> Result<DiffMap> {
        let session = self.session(user, sheet)?;

        let (diff, pending, _persist) = {
            let mut state = session.state.lock();
            let externals = self.externals(user, &session.template)?;
            let diff = state.apply_bulk(&self.ctx(), edits, role, externals)?;
            let pending = pending_saves(&state, edits.iter().map(|(key, _)| key.as_str()));
            (diff, pending, session.persist.lock())
        };

        self.persist(user, sheet, &pending)?;
        Ok(diff)
    }

    /// Every cell of a sheet, with cross-sheet values brought up to date.
    pub fn snapshot(&self, user: &str, sheet: SheetName) -> Result<SheetDocument> {
        let session = self.session(user, sheet)?;
        let mut state = session.state.lock();
        let externals = self.externals(user, &session.template)?;
        state.refresh_externals(&self.ctx(), externals)?;
        Ok(state.document())
    }

    pub fn cell(&self, user: &str, sheet: SheetName, key: &str) -> Result<Cell> {
        let session = self.session(user, sheet)?;
        let mut state = session.state.lock();
        let externals = self.externals(user, &session.template)?;
        state.refresh_externals(&self.ctx(), externals)?;
        state.get(key)
    }

    /// Drop a session; the next request reloads it from the store.
    pub fn evict(&self, user: &str, sheet: SheetName) -> bool {
        self.sessions.remove(&(user.to_string(), sheet)).is_some()
    }

    pub fn is_loaded(&self, user: &str, sheet: SheetName) -> bool {
        self.sessions.contains_key(&(user.to_string(), sheet))
    }

    fn ctx(&self) -> EvalContext<'_> {
        EvalContext::new(self.catalog.registry(), self.params.as_ref())
    }

    fn template(&self, sheet: SheetName) -> Result<Arc<SheetTemplate>> {
        self.catalog
            .template(sheet)
            .cloned()
            .map_err(|reason| CoreError::SheetUnavailable { sheet, reason })
    }

    /// The session for `(user, sheet)`, loading it from the store if needed.
    fn session(&self, user: &str, sheet: SheetName) -> Result<Arc<Session>> {
        let id = (user.to_string(), sheet);
        if let Some(session) = self.sessions.get(&id) {
            return Ok(Arc::clone(session.value()));
        }

        // Loaded without holding the map lock; a concurrent loader may win.
        let template = self.template(sheet)?;
        let stored = self.store.load(user, sheet)?;
        let externals = self.externals(user, &template)?;
        let mut state = SheetState::new(Arc::clone(&template));
        state.load_raw(stored);
        state.replace_externals(externals);
        state
            .recompute_all(&self.ctx())
            .map_err(|cycle| CoreError::CycleDetected { sheet, cycle })?;
        tracing::debug!(user, sheet = %sheet, "session loaded");

        let session = Arc::new(Session {
            template,
            state: Mutex::new(state),
            persist: Mutex::new(()),
        });
        Ok(Arc::clone(self.sessions.entry(id).or_insert(session).value()))
    }

    /// Snapshot of every value `template` reads from other sheets.
    ///
    /// Each source sheet is locked, then brought up to date with its own
    /// sources, which are locked in turn. The caller holds the reader's lock.
    fn externals(&self, user: &str, template: &SheetTemplate) -> Result<Externals> {
        let mut externals = Externals::new();
        for source in template.referenced_sheets() {
            let session = self.session(user, source)?;
            let mut state = session.state.lock();
            let upstream = self.externals(user, &session.template)?;
            state.refresh_externals(&self.ctx(), upstream)?;
            for (sheet, key) in template.external_refs() {
                if *sheet == source {
                    externals.insert((source, key.clone()), state.computed_value(key).cloned());
                }
            }
        }
        Ok(externals)
    }

    fn persist(
        &self,
        user: &str,
        sheet: SheetName,
        pending: &[(CellKey, Option<RawValue>)],
    ) -> Result<()> {
        for (key, value) in pending {
            if let Err(err) = self.save_with_retry(user, sheet, key, value.as_ref()) {
                tracing::error!(user, sheet = %sheet, cell = %key, error = %err, "save failed, evicting session");
                self.evict(user, sheet);
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn save_with_retry(
        &self,
        user: &str,
        sheet: SheetName,
        key: &CellKey,
        value: Option<&RawValue>,
    ) -> std::result::Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.save(user, sheet, key, value) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.max_save_attempts => {
                    tracing::warn!(user, sheet = %sheet, cell = %key, attempt, error = %err, "save failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Current raw values of the edited keys, each key once, in edit order.
fn pending_saves<'a>(
    state: &SheetState,
    keys: impl IntoIterator<Item = &'a str>,
) -> Vec<(CellKey, Option<RawValue>)> {
    let mut pending: Vec<(CellKey, Option<RawValue>)> = Vec::new();
    for key in keys {
        let Ok(cell) = state.get(key) else { continue };
        if !pending.iter().any(|(k, _)| *k == cell.key) {
            pending.push((cell.key, cell.raw_value));
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GlobalParameters;
    use crate::storage::MemoryStore;
    use planline_engine::engine::ReportedValue;

    fn workbook(store: Arc<MemoryStore>) -> Workbook {
        Workbook::new(
            Arc::new(Catalog::standard()),
            Arc::new(GlobalParameters::standard()),
            store,
        )
    }

    fn num(n: f64) -> Option<RawValue> {
        Some(RawValue::Number(n))
    }

    #[test]
    fn test_edit_is_saved() {
        let store = Arc::new(MemoryStore::new());
        let wb = workbook(store.clone());
        wb.apply_edit("alice", SheetName::MqCurrent, "pq_sales", num(1000.0), Role::User)
            .unwrap();
        assert_eq!(
            store.get("alice", SheetName::MqCurrent, "pq_sales"),
            Some(RawValue::Number(1000.0))
        );
    }

    #[test]
    fn test_save_retried_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let wb = workbook(store.clone()).with_max_save_attempts(3);
        store.fail_saves(2);
        let diff = wb
            .apply_edit("alice", SheetName::MqCurrent, "p_price", num(100.0), Role::User)
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(store.save_count(), 1);
        assert!(wb.is_loaded("alice", SheetName::MqCurrent));
    }

    #[test]
    fn test_save_failure_evicts_session() {
        let store = Arc::new(MemoryStore::new());
        let wb = workbook(store.clone()).with_max_save_attempts(2);
        wb.apply_edit("alice", SheetName::MqCurrent, "pq_sales", num(1000.0), Role::User)
            .unwrap();

        store.fail_saves(2);
        let err = wb
            .apply_edit("alice", SheetName::MqCurrent, "pq_sales", num(2000.0), Role::User)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!wb.is_loaded("alice", SheetName::MqCurrent));

        // Reloaded from the store, which still holds the last saved value.
        let cell = wb.cell("alice", SheetName::MqCurrent, "pq_sales").unwrap();
        assert_eq!(cell.raw_value, Some(RawValue::Number(1000.0)));
    }

    #[test]
    fn test_cross_sheet_value_reaches_reader() {
        let store = Arc::new(MemoryStore::new());
        let wb = workbook(store);
        wb.apply_edit("alice", SheetName::CostDetail, "rent:amount", num(50_000.0), Role::User)
            .unwrap();
        wb.apply_edit("alice", SheetName::Salary, "base_salary", num(300_000.0), Role::Admin)
            .unwrap();
        wb.apply_edit("alice", SheetName::Salary, "employee_count", num(2.0), Role::User)
            .unwrap();

        let diff = wb
            .apply_edit("alice", SheetName::CostDetail, "other:amount", num(1_000.0), Role::User)
            .unwrap();
        // gross 300000 plus 16% employer share, for two employees
        assert_eq!(
            diff.get("personnel:amount"),
            Some(&ReportedValue::Number(696_000.0))
        );
        assert_eq!(diff.get("fixed:total"), Some(&ReportedValue::Number(747_000.0)));
    }

    #[test]
    fn test_edit_waiting_on_lock_sees_newer_source_values() {
        let store = Arc::new(MemoryStore::new());
        let wb = Arc::new(workbook(store));
        wb.apply_edit("alice", SheetName::Salary, "base_salary", num(300_000.0), Role::Admin)
            .unwrap();
        wb.apply_edit("alice", SheetName::Salary, "employee_count", num(1.0), Role::User)
            .unwrap();
        wb.apply_edit("alice", SheetName::CostDetail, "rent:amount", num(1.0), Role::User)
            .unwrap();

        let reader = wb.session("alice", SheetName::CostDetail).unwrap();
        let guard = reader.state.lock();
        let edit = {
            let wb = Arc::clone(&wb);
            std::thread::spawn(move || {
                wb.apply_edit("alice", SheetName::CostDetail, "other:amount", num(1.0), Role::User)
                    .unwrap()
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        wb.apply_edit("alice", SheetName::Salary, "base_salary", num(400_000.0), Role::Admin)
            .unwrap();
        drop(guard);

        // 400000 plus the 16% employer share, one employee
        let diff = edit.join().unwrap();
        assert_eq!(
            diff.get("personnel:amount"),
            Some(&ReportedValue::Number(464_000.0))
        );
    }

    #[test]
    fn test_concurrent_edits_to_one_sheet_stay_consistent() {
        let store = Arc::new(MemoryStore::new());
        let wb = Arc::new(workbook(store.clone()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let wb = Arc::clone(&wb);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let key = if (t + n) % 2 == 0 { "pq_sales" } else { "vq_variable_costs" };
                        let value = (t * 1000 + n) as f64;
                        wb.apply_edit("alice", SheetName::MqCurrent, key, num(value), Role::User)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let cell = |key: &str| wb.cell("alice", SheetName::MqCurrent, key).unwrap();
        let sales = cell("pq_sales").raw_value.and_then(|v| v.as_number()).unwrap();
        let variable = cell("vq_variable_costs").raw_value.and_then(|v| v.as_number()).unwrap();
        let gross = cell("m_gross_profit").computed_value.and_then(|v| v.as_number());
        assert_eq!(gross, Some(sales - variable));
        let profit = cell("g_profit").computed_value.and_then(|v| v.as_number());
        assert_eq!(profit, Some(sales - variable));

        assert_eq!(
            store.get("alice", SheetName::MqCurrent, "pq_sales"),
            Some(RawValue::Number(sales))
        );
        assert_eq!(
            store.get("alice", SheetName::MqCurrent, "vq_variable_costs"),
            Some(RawValue::Number(variable))
        );
    }

    #[test]
    fn test_users_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let wb = workbook(store);
        wb.apply_edit("alice", SheetName::MqCurrent, "p_price", num(100.0), Role::User)
            .unwrap();
        let bob = wb.cell("bob", SheetName::MqCurrent, "p_price").unwrap();
        assert_eq!(bob.raw_value, None);
    }

    #[test]
    fn test_unavailable_sheet() {
        let catalog = Catalog::build(vec![planline_engine::templates::mq_current()]);
        let wb = Workbook::new(
            Arc::new(catalog),
            Arc::new(GlobalParameters::standard()),
            Arc::new(MemoryStore::new()),
        );
        let err = wb
            .apply_edit("alice", SheetName::Salary, "overtime_hours", num(1.0), Role::User)
            .unwrap_err();
        assert!(matches!(err, CoreError::SheetUnavailable { .. }));
    }

    #[test]
    fn test_parallel_users() {
        let store = Arc::new(MemoryStore::new());
        let wb = Arc::new(workbook(store));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let wb = Arc::clone(&wb);
                std::thread::spawn(move || {
                    let user = format!("user{}", i);
                    for n in 1..=20 {
                        wb.apply_edit(&user, SheetName::MqCurrent, "pq_sales", num(n as f64 * 100.0), Role::User)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4 {
            let cell = wb
                .cell(&format!("user{}", i), SheetName::MqCurrent, "m_gross_profit")
                .unwrap();
            assert_eq!(cell.computed_value.and_then(|v| v.as_number()), Some(2000.0));
        }
    }
}
