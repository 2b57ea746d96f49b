//! Recompute API behaviour against the standard sheets.

use std::sync::Arc;

use planline_core::{
    Catalog, CoreError, DenyReason, ErrorKind, GlobalParameters, MemoryStore, RawValue,
    ReportedValue, Role, SheetName, Workbook,
};
use planline_engine::engine::{CellError, ComputedValue, FieldClass, Reference, TemplateBuilder};

const USER: &str = "alice";

fn workbook() -> (Workbook, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let wb = Workbook::new(
        Arc::new(Catalog::standard()),
        Arc::new(GlobalParameters::standard()),
        store.clone(),
    );
    (wb, store)
}

fn num(n: f64) -> Option<RawValue> {
    Some(RawValue::Number(n))
}

fn set(wb: &Workbook, sheet: SheetName, key: &str, n: f64) -> planline_core::DiffMap {
    wb.apply_edit(USER, sheet, key, num(n), Role::User).unwrap()
}

fn reported(wb: &Workbook, sheet: SheetName, key: &str) -> ReportedValue {
    let cell = wb.cell(USER, sheet, key).unwrap();
    planline_engine::engine::report(cell.computed_value.as_ref(), cell.field_class)
}

#[test]
fn test_breakeven_ratio_and_point() {
    let (wb, _) = workbook();
    set(&wb, SheetName::Breakeven, "current_sales", 1000.0);
    set(&wb, SheetName::Breakeven, "current_variable_costs", 600.0);
    set(&wb, SheetName::Breakeven, "current_fixed_costs", 200.0);

    assert_eq!(
        reported(&wb, SheetName::Breakeven, "current_variable_cost_ratio"),
        ReportedValue::Number(0.6)
    );
    assert_eq!(
        reported(&wb, SheetName::Breakeven, "current_breakeven_point"),
        ReportedValue::Number(500.0)
    );
    assert_eq!(
        reported(&wb, SheetName::Breakeven, "current_operating_profit"),
        ReportedValue::Number(200.0)
    );
}

#[test]
fn test_mq_calculated_sales() {
    let (wb, _) = workbook();
    set(&wb, SheetName::MqCurrent, "p_price", 100.0);
    let diff = set(&wb, SheetName::MqCurrent, "q_quantity", 5.0);
    assert_eq!(diff.get("calculated_sales"), Some(&ReportedValue::Number(500.0)));
    assert_eq!(diff.len(), 1);
}

#[test]
fn test_mq_g_profit() {
    let (wb, _) = workbook();
    set(&wb, SheetName::MqCurrent, "pq_sales", 1000.0);
    set(&wb, SheetName::MqCurrent, "vq_variable_costs", 600.0);
    assert_eq!(
        reported(&wb, SheetName::MqCurrent, "m_gross_profit"),
        ReportedValue::Number(400.0)
    );
    let diff = set(&wb, SheetName::MqCurrent, "f_fixed_costs", 50.0);
    assert_eq!(diff.get("g_profit"), Some(&ReportedValue::Number(350.0)));
}

#[test]
fn test_zero_variable_costs_breakeven_equals_fixed_costs() {
    let (wb, _) = workbook();
    set(&wb, SheetName::MqCurrent, "pq_sales", 1000.0);
    set(&wb, SheetName::MqCurrent, "f_fixed_costs", 200.0);
    set(&wb, SheetName::MqCurrent, "vq_variable_costs", 300.0);

    let diff = set(&wb, SheetName::MqCurrent, "vq_variable_costs", 0.0);
    assert_eq!(
        diff.get("current_variable_cost_ratio"),
        Some(&ReportedValue::Number(0.0))
    );
    assert_eq!(
        diff.get("current_breakeven_point"),
        Some(&ReportedValue::Number(200.0))
    );
}

#[test]
fn test_formula_cell_edit_denied_and_store_untouched() {
    let (wb, store) = workbook();
    set(&wb, SheetName::MqCurrent, "pq_sales", 1000.0);
    let saves = store.save_count();

    let err = wb
        .apply_edit(USER, SheetName::MqCurrent, "m_gross_profit", num(1.0), Role::User)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::PermissionDenied {
            reason: DenyReason::FormulaCell,
            ..
        }
    ));
    assert_eq!(store.save_count(), saves);
    assert!(store.get(USER, SheetName::MqCurrent, "m_gross_profit").is_none());
    assert_eq!(
        reported(&wb, SheetName::MqCurrent, "m_gross_profit"),
        ReportedValue::Number(1000.0)
    );
}

#[test]
fn test_admin_cell_denied_for_user() {
    let (wb, store) = workbook();
    wb.apply_edit(USER, SheetName::Salary, "base_salary", num(250_000.0), Role::Admin)
        .unwrap();

    let err = wb
        .apply_edit(USER, SheetName::Salary, "base_salary", num(1.0), Role::User)
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    let cell = wb.cell(USER, SheetName::Salary, "base_salary").unwrap();
    assert_eq!(cell.raw_value, Some(RawValue::Number(250_000.0)));
    assert_eq!(cell.computed_value, Some(ComputedValue::Number(250_000.0)));
    assert_eq!(
        store.get(USER, SheetName::Salary, "base_salary"),
        Some(RawValue::Number(250_000.0))
    );
}

#[test]
fn test_unknown_cell_rejected() {
    let (wb, store) = workbook();
    let err = wb
        .apply_edit(USER, SheetName::MqCurrent, "made_up", num(1.0), Role::User)
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownCell { .. }));
    assert_eq!(store.save_count(), 0);
}

#[test]
fn test_malformed_key_is_unknown_cell() {
    let (wb, store) = workbook();
    for key in ["no such", "a:b:c", ""] {
        let err = wb
            .apply_edit(USER, SheetName::MqCurrent, key, num(1.0), Role::User)
            .unwrap_err();
        assert!(
            matches!(&err, CoreError::UnknownCell { cell, .. } if cell == key),
            "{:?}",
            err
        );
    }
    assert_eq!(store.save_count(), 0);
}

#[test]
fn test_divide_by_zero_propagates_with_origin() {
    let (wb, _) = workbook();
    set(&wb, SheetName::Breakeven, "current_sales", 1000.0);
    set(&wb, SheetName::Breakeven, "current_variable_costs", 600.0);
    let diff = set(&wb, SheetName::Breakeven, "current_sales", 0.0);
    assert_eq!(
        diff.get("current_variable_cost_ratio"),
        Some(&ReportedValue::Error(ErrorKind::DivideByZero))
    );

    let cell = wb
        .cell(USER, SheetName::Breakeven, "current_breakeven_point")
        .unwrap();
    let Some(ComputedValue::Error(err)) = cell.computed_value else {
        panic!("expected an error value");
    };
    assert_eq!(err.kind(), ErrorKind::DivideByZero);
    assert_eq!(
        err.origin(),
        Some(&"current_variable_cost_ratio".parse::<Reference>().unwrap())
    );

    // The origin survives further propagation.
    let gap = wb.cell(USER, SheetName::Breakeven, "target_sales_gap").unwrap();
    assert_eq!(
        gap.computed_value.as_ref().and_then(ComputedValue::as_error).and_then(CellError::origin),
        Some(&"current_variable_cost_ratio".parse::<Reference>().unwrap())
    );
}

#[test]
fn test_bulk_union_of_diffs() {
    let (wb, store) = workbook();
    let edits = vec![
        ("pq_sales".to_string(), num(1000.0)),
        ("vq_variable_costs".to_string(), num(600.0)),
        ("f_fixed_costs".to_string(), num(200.0)),
        ("pq_sales".to_string(), num(2000.0)),
    ];
    let diff = wb
        .apply_bulk(USER, SheetName::MqCurrent, &edits, Role::User)
        .unwrap();
    assert_eq!(diff.get("m_gross_profit"), Some(&ReportedValue::Number(1400.0)));
    assert_eq!(diff.get("g_profit"), Some(&ReportedValue::Number(1200.0)));
    assert_eq!(
        diff.get("current_variable_cost_ratio"),
        Some(&ReportedValue::Number(0.3))
    );
    assert_eq!(
        store.get(USER, SheetName::MqCurrent, "pq_sales"),
        Some(RawValue::Number(2000.0))
    );
}

#[test]
fn test_bulk_rejection_is_atomic() {
    let (wb, store) = workbook();
    let edits = vec![
        ("pq_sales".to_string(), num(1000.0)),
        ("g_profit".to_string(), num(5.0)),
    ];
    let err = wb
        .apply_bulk(USER, SheetName::MqCurrent, &edits, Role::User)
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    assert_eq!(store.save_count(), 0);
    let sales = wb.cell(USER, SheetName::MqCurrent, "pq_sales").unwrap();
    assert_eq!(sales.raw_value, None);
}

#[test]
fn test_clearing_an_input() {
    let (wb, store) = workbook();
    set(&wb, SheetName::MqCurrent, "p_price", 100.0);
    set(&wb, SheetName::MqCurrent, "q_quantity", 5.0);
    let diff = wb
        .apply_edit(USER, SheetName::MqCurrent, "q_quantity", None, Role::User)
        .unwrap();
    assert_eq!(diff.get("calculated_sales"), Some(&ReportedValue::Number(0.0)));
    assert!(store.get(USER, SheetName::MqCurrent, "q_quantity").is_none());
}

#[test]
fn test_future_plan_follows_current_sheet() {
    let (wb, _) = workbook();
    set(&wb, SheetName::MqCurrent, "pq_sales", 1000.0);
    set(&wb, SheetName::MqCurrent, "vq_variable_costs", 600.0);
    set(&wb, SheetName::MqCurrent, "f_fixed_costs", 200.0);

    set(&wb, SheetName::MqFuture, "planned_fixed_costs", 250.0);
    let diff = set(&wb, SheetName::MqFuture, "sales_growth_rate", 0.2);
    assert_eq!(diff.get("planned_sales"), Some(&ReportedValue::Number(1200.0)));
    assert_eq!(diff.get("planned_gross_profit"), Some(&ReportedValue::Number(480.0)));
    assert_eq!(diff.get("planned_profit"), Some(&ReportedValue::Number(230.0)));
    assert_eq!(diff.get("profit_change"), Some(&ReportedValue::Number(30.0)));

    // A change on the current sheet shows up on the next future-sheet request.
    set(&wb, SheetName::MqCurrent, "pq_sales", 2000.0);
    let doc = wb.snapshot(USER, SheetName::MqFuture).unwrap();
    let planned = doc.get("planned_sales").unwrap();
    assert_eq!(
        planned.computed_value.as_ref().and_then(ComputedValue::as_number).map(f64::round),
        Some(2400.0)
    );
}

#[test]
fn test_rejected_template_is_unavailable() {
    let catalog = Catalog::build(vec![
        TemplateBuilder::new(SheetName::Breakeven)
            .input("a", FieldClass::Exact)
            .formula("x", FieldClass::Exact, "y + a", &["y", "a"])
            .formula("y", FieldClass::Exact, "x + a", &["x", "a"]),
        planline_engine::templates::mq_current(),
    ]);
    let wb = Workbook::new(
        Arc::new(catalog),
        Arc::new(GlobalParameters::standard()),
        Arc::new(MemoryStore::new()),
    );
    let err = wb
        .apply_edit(USER, SheetName::Breakeven, "a", num(1.0), Role::User)
        .unwrap_err();
    assert!(matches!(err, CoreError::SheetUnavailable { .. }));
    assert!(wb
        .apply_edit(USER, SheetName::MqCurrent, "p_price", num(1.0), Role::User)
        .is_ok());
}

#[test]
fn test_stored_values_are_loaded() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(USER, SheetName::MqCurrent, "pq_sales", RawValue::Number(1000.0));
    store.insert_raw(USER, SheetName::MqCurrent, "retired_cell", RawValue::Number(1.0));
    store.insert_raw(USER, SheetName::MqCurrent, "g_profit", RawValue::Number(9.0));
    let wb = Workbook::new(
        Arc::new(Catalog::standard()),
        Arc::new(GlobalParameters::standard()),
        store,
    );
    assert_eq!(
        reported(&wb, SheetName::MqCurrent, "m_gross_profit"),
        ReportedValue::Number(1000.0)
    );
    let g = wb.cell(USER, SheetName::MqCurrent, "g_profit").unwrap();
    assert_eq!(g.raw_value, None);
    assert_eq!(g.computed_value, Some(ComputedValue::Number(1000.0)));
}
