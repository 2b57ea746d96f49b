//! planline_engine - Sheet templates, dependency graph and Rhai formulas.

pub mod builtins;
pub mod engine;
pub mod templates;

#[cfg(test)]
mod tests {
    use crate::engine::*;
    use crate::templates;

    fn key(name: &str) -> CellKey {
        CellKey::parse(name).unwrap()
    }

    #[test]
    fn test_mq_graph_affected_by_variable_costs() {
        let catalog = Catalog::standard();
        let template = catalog.template(SheetName::MqCurrent).unwrap();
        let affected = template.graph().affected_set(&key("vq_variable_costs"));
        let order = template.graph().topological_order(&affected).unwrap();
        let names: Vec<&str> = order.iter().map(CellKey::as_str).collect();
        assert_eq!(
            names,
            vec![
                "m_gross_profit",
                "g_profit",
                "current_variable_cost_ratio",
                "current_gross_profit_ratio",
                "current_breakeven_point",
                "g_profit_ratio",
            ]
        );
    }

    #[test]
    fn test_price_only_affects_calculated_sales() {
        let catalog = Catalog::standard();
        let template = catalog.template(SheetName::MqCurrent).unwrap();
        let affected = template.graph().affected_set(&key("p_price"));
        assert_eq!(affected.keys(), &[key("calculated_sales")]);
    }

    #[test]
    fn test_formula_cells_are_system_level() {
        let catalog = Catalog::standard();
        for template in catalog.templates() {
            for cell in template.cells() {
                if !cell.is_input() {
                    assert_eq!(cell.permission_level, Role::System);
                } else {
                    assert!(cell.dependencies.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_standard_template_count() {
        assert_eq!(templates::standard_templates().len(), SheetName::ALL.len());
    }

    #[test]
    fn test_cost_detail_reads_salary() {
        let catalog = Catalog::standard();
        let template = catalog.template(SheetName::CostDetail).unwrap();
        assert_eq!(
            template.readers_of(SheetName::Salary, &key("total_payroll")),
            &[key("personnel:amount")]
        );
    }
}
