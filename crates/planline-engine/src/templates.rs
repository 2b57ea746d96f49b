//! Standard business sheets.
//!
//! Amounts are plain numbers in the sheet's unit (yen). Ratios are fractions:
//! 0.6 means 60%. Every division goes through `div`.

use crate::engine::{FieldClass, SheetName, TemplateBuilder};

use FieldClass::{Exact, Ratio, Total};

/// Defaults for every global parameter the standard sheets read.
pub const STANDARD_PARAMETERS: &[(&str, f64)] = &[
    ("overtime_multiplier", 1.25),
    ("standard_monthly_hours", 160.0),
    ("social_insurance_rate", 0.15),
    ("employer_insurance_rate", 0.16),
    ("income_tax_rate", 0.1),
];

pub fn standard_templates() -> Vec<TemplateBuilder> {
    vec![
        mq_current(),
        mq_future(),
        breakeven(),
        salary(),
        cost_detail(),
    ]
}

/// MQ accounting for the current period: P×Q, VQ, M, F, G.
pub fn mq_current() -> TemplateBuilder {
    TemplateBuilder::new(SheetName::MqCurrent)
        .input("p_price", Exact)
        .input("q_quantity", Exact)
        .input("pq_sales", Total)
        .input("vq_variable_costs", Total)
        .input("f_fixed_costs", Total)
        .formula(
            "calculated_sales",
            Total,
            "p_price * q_quantity",
            &["p_price", "q_quantity"],
        )
        .formula(
            "m_gross_profit",
            Total,
            "pq_sales - vq_variable_costs",
            &["pq_sales", "vq_variable_costs"],
        )
        .formula(
            "g_profit",
            Total,
            "m_gross_profit - f_fixed_costs",
            &["m_gross_profit", "f_fixed_costs"],
        )
        .formula(
            "current_variable_cost_ratio",
            Ratio,
            "div(vq_variable_costs, pq_sales)",
            &["vq_variable_costs", "pq_sales"],
        )
        .formula(
            "current_gross_profit_ratio",
            Ratio,
            "div(m_gross_profit, pq_sales)",
            &["m_gross_profit", "pq_sales"],
        )
        .formula(
            "current_breakeven_point",
            Total,
            "div(f_fixed_costs, 1.0 - current_variable_cost_ratio)",
            &["f_fixed_costs", "current_variable_cost_ratio"],
        )
        .formula(
            "g_profit_ratio",
            Ratio,
            "div(g_profit, pq_sales)",
            &["g_profit", "pq_sales"],
        )
}

/// Next-period plan derived from the current MQ sheet.
pub fn mq_future() -> TemplateBuilder {
    TemplateBuilder::new(SheetName::MqFuture)
        .input("sales_growth_rate", Ratio)
        .input("variable_cost_change_rate", Ratio)
        .input("planned_fixed_costs", Total)
        .formula(
            "planned_sales",
            Total,
            "sheets.mq_current[\"pq_sales\"] * (1.0 + sales_growth_rate)",
            &["mq_current!pq_sales", "sales_growth_rate"],
        )
        .formula(
            "planned_variable_costs",
            Total,
            "sheets.mq_current[\"vq_variable_costs\"] * (1.0 + sales_growth_rate) \
             * (1.0 + variable_cost_change_rate)",
            &[
                "mq_current!vq_variable_costs",
                "sales_growth_rate",
                "variable_cost_change_rate",
            ],
        )
        .formula(
            "planned_gross_profit",
            Total,
            "planned_sales - planned_variable_costs",
            &["planned_sales", "planned_variable_costs"],
        )
        .formula(
            "planned_profit",
            Total,
            "planned_gross_profit - planned_fixed_costs",
            &["planned_gross_profit", "planned_fixed_costs"],
        )
        .formula(
            "planned_variable_cost_ratio",
            Ratio,
            "div(planned_variable_costs, planned_sales)",
            &["planned_variable_costs", "planned_sales"],
        )
        .formula(
            "planned_breakeven_point",
            Total,
            "div(planned_fixed_costs, 1.0 - planned_variable_cost_ratio)",
            &["planned_fixed_costs", "planned_variable_cost_ratio"],
        )
        .formula(
            "profit_change",
            Total,
            "planned_profit - sheets.mq_current[\"g_profit\"]",
            &["planned_profit", "mq_current!g_profit"],
        )
}

/// Breakeven analysis: where profit is zero, and what a target profit needs.
pub fn breakeven() -> TemplateBuilder {
    TemplateBuilder::new(SheetName::Breakeven)
        .input("current_sales", Total)
        .input("current_variable_costs", Total)
        .input("current_fixed_costs", Total)
        .input("target_profit", Total)
        .formula(
            "current_variable_cost_ratio",
            Ratio,
            "div(current_variable_costs, current_sales)",
            &["current_variable_costs", "current_sales"],
        )
        .formula(
            "current_marginal_profit_ratio",
            Ratio,
            "1.0 - current_variable_cost_ratio",
            &["current_variable_cost_ratio"],
        )
        .formula(
            "current_breakeven_point",
            Total,
            "div(current_fixed_costs, 1.0 - current_variable_cost_ratio)",
            &["current_fixed_costs", "current_variable_cost_ratio"],
        )
        .formula(
            "current_operating_profit",
            Total,
            "current_sales - current_variable_costs - current_fixed_costs",
            &[
                "current_sales",
                "current_variable_costs",
                "current_fixed_costs",
            ],
        )
        .formula(
            "current_breakeven_ratio",
            Ratio,
            "div(current_breakeven_point, current_sales)",
            &["current_breakeven_point", "current_sales"],
        )
        .formula(
            "current_safety_margin_ratio",
            Ratio,
            "1.0 - current_breakeven_ratio",
            &["current_breakeven_ratio"],
        )
        .formula(
            "target_required_sales",
            Total,
            "div(current_fixed_costs + target_profit, 1.0 - current_variable_cost_ratio)",
            &[
                "current_fixed_costs",
                "target_profit",
                "current_variable_cost_ratio",
            ],
        )
        .formula(
            "target_sales_gap",
            Total,
            "target_required_sales - current_sales",
            &["target_required_sales", "current_sales"],
        )
}

/// Monthly payroll for one pay grade. Pay rates are set by admins.
pub fn salary() -> TemplateBuilder {
    TemplateBuilder::new(SheetName::Salary)
        .input("employee_count", Exact)
        .admin_input("base_salary", Total)
        .admin_input("allowances", Total)
        .input("overtime_hours", Exact)
        .formula(
            "hourly_rate",
            Exact,
            "div(base_salary, params.standard_monthly_hours)",
            &["base_salary", "$standard_monthly_hours"],
        )
        .formula(
            "overtime_pay",
            Total,
            "hourly_rate * overtime_hours * params.overtime_multiplier",
            &["hourly_rate", "overtime_hours", "$overtime_multiplier"],
        )
        .formula(
            "gross_pay",
            Total,
            "base_salary + allowances + overtime_pay",
            &["base_salary", "allowances", "overtime_pay"],
        )
        .formula(
            "social_insurance",
            Total,
            "gross_pay * params.social_insurance_rate",
            &["gross_pay", "$social_insurance_rate"],
        )
        .formula(
            "taxable_pay",
            Total,
            "gross_pay - social_insurance",
            &["gross_pay", "social_insurance"],
        )
        .formula(
            "income_tax",
            Total,
            "taxable_pay * params.income_tax_rate",
            &["taxable_pay", "$income_tax_rate"],
        )
        .formula(
            "net_pay",
            Total,
            "taxable_pay - income_tax",
            &["taxable_pay", "income_tax"],
        )
        .formula(
            "employer_contribution",
            Total,
            "gross_pay * params.employer_insurance_rate",
            &["gross_pay", "$employer_insurance_rate"],
        )
        .formula(
            "total_payroll",
            Total,
            "(gross_pay + employer_contribution) * employee_count",
            &["gross_pay", "employer_contribution", "employee_count"],
        )
}

/// Cost breakdown by line, addressed as `line:column`.
pub fn cost_detail() -> TemplateBuilder {
    TemplateBuilder::new(SheetName::CostDetail)
        .input("materials:amount", Total)
        .input("outsourcing:amount", Total)
        .input("shipping:amount", Total)
        .input("rent:amount", Total)
        .input("depreciation:amount", Total)
        .input("utilities:amount", Total)
        .input("other:amount", Total)
        .formula(
            "personnel:amount",
            Total,
            "sheets.salary[\"total_payroll\"]",
            &["salary!total_payroll"],
        )
        .formula(
            "variable:total",
            Total,
            "materials__amount + outsourcing__amount + shipping__amount",
            &["materials:amount", "outsourcing:amount", "shipping:amount"],
        )
        .formula(
            "fixed:total",
            Total,
            "sum([personnel__amount, rent__amount, depreciation__amount, utilities__amount, other__amount])",
            &[
                "personnel:amount",
                "rent:amount",
                "depreciation:amount",
                "utilities:amount",
                "other:amount",
            ],
        )
        .formula(
            "cost:total",
            Total,
            "variable__total + fixed__total",
            &["variable:total", "fixed:total"],
        )
        .formula(
            "variable:share",
            Ratio,
            "div(variable__total, cost__total)",
            &["variable:total", "cost:total"],
        )
        .formula(
            "personnel:share",
            Ratio,
            "div(personnel__amount, fixed__total)",
            &["personnel:amount", "fixed:total"],
        )
}
