use super::*;
use crate::types::parse_timestamp;
use pretty_assertions::assert_eq;

fn engine() -> CalculationEngine {
    CalculationEngine::new().unwrap()
}

fn order_table() -> Table {
    Table::from_columns([
        Column::new("quantity", ColumnValue::Number(vec![10.0, 20.0, 15.0])),
        Column::new("unit_price", ColumnValue::Number(vec![100.0, 150.0, 200.0])),
        Column::new("discount_rate", ColumnValue::Number(vec![0.1, 0.05, 0.0])),
    ])
}

fn sales_table() -> Table {
    let dates = [
        "2024-01-15",
        "2024-01-20",
        "2024-02-10",
        "2024-02-15",
        "2024-03-05",
    ]
    .iter()
    .map(|d| parse_timestamp(d, None))
    .collect();
    Table::from_columns([
        Column::new("product", ColumnValue::text(&["A", "B", "A", "C", "B"])),
        Column::new(
            "region",
            ColumnValue::text(&["North", "North", "South", "South", "North"]),
        ),
        Column::new(
            "revenue",
            ColumnValue::Number(vec![100.0, 200.0, 150.0, 300.0, 250.0]),
        ),
        Column::new(
            "quantity",
            ColumnValue::Number(vec![10.0, 5.0, 15.0, 8.0, 12.0]),
        ),
        Column::new("date", ColumnValue::Date(dates)),
    ])
}

fn rule(name: &str, formula: &str) -> CalculationRule {
    CalculationRule::new(name, formula).unwrap()
}

fn numbers(table: &Table, name: &str) -> Vec<f64> {
    match table.column(name).map(|c| &c.values) {
        Some(ColumnValue::Number(nums)) => nums.clone(),
        other => panic!("Expected Number column '{}', got {:?}", name, other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_validate_arithmetic_formulas() {
    let engine = engine();
    for formula in [
        "a + b",
        "quantity * unit_price",
        "(a + b) * c",
        "-x + y",
        "a / b - c",
        "x ** 2",
        "a % b",
        "a + + b",
        "- - a",
        "1.5e3 * rate",
        "42",
    ] {
        assert!(engine.validate_formula(formula), "should be valid: {}", formula);
    }
}

#[test]
fn test_validate_aggregation_formulas() {
    let engine = engine();
    for formula in [
        "SUM(revenue)",
        "MEAN(price)",
        "COUNT(items)",
        "MIN(value)",
        "MAX(amount)",
        "STD(scores)",
        "VAR(measurements)",
        "sum( revenue )",
    ] {
        assert!(engine.validate_formula(formula), "should be valid: {}", formula);
    }
}

#[test]
fn test_validate_rejects_invalid_syntax() {
    let engine = engine();
    for formula in [
        "a +",
        "* b",
        "SUM(",
        "UNKNOWN_FUNC(x)",
        "import os",
        "exec('print')",
        "a > b",
        "a == b",
        "a and b",
        "obj.attr",
        "items[0]",
        "'text'",
        "x = 1",
        "",
    ] {
        assert!(!engine.validate_formula(formula), "should be invalid: {}", formula);
    }
}

#[test]
fn test_validate_rejects_malformed_aggregations() {
    let engine = engine();
    for formula in ["SUM()", "MEAN(a, b)", "COUNT(123)", "SUM a", "INVALID(column)", "SUM(a) * 2"] {
        assert!(!engine.validate_formula(formula), "should be invalid: {}", formula);
    }
}

#[test]
fn test_malformed_aggregation_parse_error_names_formula() {
    let engine = engine();
    for formula in ["SUM()", "MEAN(a,b)", "SUM a"] {
        match engine.parse_aggregation_formula(formula) {
            Err(CalcError::MalformedAggregation(f)) => assert_eq!(f, formula),
            other => panic!("Expected malformed aggregation for {}, got {:?}", formula, other),
        }
    }
}

#[test]
fn test_aggregation_detection() {
    let engine = engine();
    assert!(engine.is_aggregation_formula("SUM(revenue)"));
    assert!(engine.is_aggregation_formula("mean(price)"));
    assert!(!engine.is_aggregation_formula("quantity * unit_price"));
    assert!(!engine.is_aggregation_formula("SUM_column * rate"));
}

// ═══════════════════════════════════════════════════════════════════════════
// ARITHMETIC
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_basic_arithmetic() {
    let output = engine()
        .apply_formula(
            &order_table(),
            &rule("gross_revenue", "quantity * unit_price"),
            &ComputedColumns::new(),
        )
        .unwrap();
    assert_eq!(output, RuleOutput::RowAligned(vec![1000.0, 3000.0, 3000.0]));
}

#[test]
fn test_formula_with_computed_columns() {
    let engine = engine();
    let table = order_table();
    let mut computed = ComputedColumns::new();

    let gross = engine
        .apply_arithmetic_formula(&table, "quantity * unit_price", &computed)
        .unwrap();
    computed.insert("gross_revenue", RuleOutput::RowAligned(gross));

    let discount = engine
        .apply_arithmetic_formula(&table, "gross_revenue * discount_rate", &computed)
        .unwrap();
    assert_eq!(discount, vec![100.0, 150.0, 0.0]);
}

#[test]
fn test_constant_formula_broadcasts_to_rows() {
    let result = engine()
        .apply_arithmetic_formula(&order_table(), "2 * 3 + 1", &ComputedColumns::new())
        .unwrap();
    assert_eq!(result, vec![7.0, 7.0, 7.0]);
}

#[test]
fn test_division_by_zero_column() {
    let table = Table::from_columns([
        Column::new("quantity", ColumnValue::Number(vec![10.0, 20.0, 15.0])),
        Column::new("zero_col", ColumnValue::Number(vec![0.0, 0.0, 0.0])),
    ]);
    let result = engine()
        .apply_arithmetic_formula(&table, "quantity / zero_col", &ComputedColumns::new())
        .unwrap();
    assert!(result.iter().all(|v| *v == f64::INFINITY));
}

#[test]
fn test_unknown_reference_is_reported_with_context() {
    let err = engine()
        .apply_formula(
            &order_table(),
            &rule("invalid", "nonexistent_column * 2"),
            &ComputedColumns::new(),
        )
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("invalid"), "{}", msg);
    assert!(msg.contains("nonexistent_column * 2"), "{}", msg);
    assert!(matches!(
        err.root_cause(),
        CalcError::UnknownReference(name) if name == "nonexistent_column"
    ));
}

#[test]
fn test_syntax_error_wrapped_with_formula() {
    let err = engine()
        .apply_arithmetic_formula(&order_table(), "quantity *", &ComputedColumns::new())
        .unwrap_err();
    assert!(matches!(err, CalcError::Formula { ref formula, .. } if formula == "quantity *"));
    assert!(matches!(err.root_cause(), CalcError::Syntax(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// AGGREGATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_aggregation_sum_without_groupby() {
    let output = engine()
        .apply_formula(
            &sales_table(),
            &rule("total_revenue", "SUM(revenue)"),
            &ComputedColumns::new(),
        )
        .unwrap();
    let series = output.as_reduced().unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series.labels(), vec!["SUM(revenue)"]);
    assert_eq!(series.as_scalar(), Some(1000.0));
}

#[test]
fn test_aggregation_with_groupby() {
    let rule = rule("avg_revenue_by_region", "MEAN(revenue)")
        .grouped_by(&["region"])
        .unwrap();
    let output = engine()
        .apply_formula(&sales_table(), &rule, &ComputedColumns::new())
        .unwrap();
    let series = output.as_reduced().unwrap();
    let mut values = series.values();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![(100.0 + 200.0 + 250.0) / 3.0, 225.0]);
}

#[test]
fn test_aggregation_date_month_groupby() {
    let rule = rule("monthly_revenue", "SUM(revenue)")
        .grouped_by(&["date::month"])
        .unwrap();
    let output = engine()
        .apply_formula(&sales_table(), &rule, &ComputedColumns::new())
        .unwrap();
    let series = output.as_reduced().unwrap();
    assert_eq!(series.get("2024-01"), Some(300.0));
    assert_eq!(series.get("2024-02"), Some(450.0));
    assert_eq!(series.get("2024-03"), Some(250.0));
}

#[test]
fn test_aggregation_missing_column() {
    let err = engine()
        .apply_formula(
            &sales_table(),
            &rule("total", "SUM(profit)"),
            &ComputedColumns::new(),
        )
        .unwrap_err();
    assert!(matches!(err.root_cause(), CalcError::UnknownColumn(c) if c == "profit"));
}

#[test]
fn test_each_aggregate_function() {
    let engine = engine();
    let table = sales_table();
    let computed = ComputedColumns::new();
    let scalar = |formula: &str| {
        engine
            .apply_formula(&table, &rule("r", formula), &computed)
            .unwrap()
            .as_reduced()
            .and_then(ReducedSeries::as_scalar)
            .unwrap()
    };

    assert_eq!(scalar("SUM(quantity)"), 50.0);
    assert_eq!(scalar("MEAN(quantity)"), 10.0);
    assert_eq!(scalar("COUNT(product)"), 5.0);
    assert_eq!(scalar("MIN(revenue)"), 100.0);
    assert_eq!(scalar("MAX(revenue)"), 300.0);
    assert_eq!(scalar("VAR(quantity)"), 14.5);
    assert!((scalar("STD(quantity)") - 14.5f64.sqrt()).abs() < 1e-12);
}

// ═══════════════════════════════════════════════════════════════════════════
// SEQUENCING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_multiple_rules_application() {
    let input = order_table();
    let rules = vec![
        rule("gross_revenue", "quantity * unit_price"),
        rule("discount_amount", "gross_revenue * discount_rate"),
        rule("net_revenue", "gross_revenue - discount_amount"),
    ];

    let result = engine().apply_multiple_rules(&input, &rules).unwrap();

    assert_eq!(
        result.column_names(),
        vec![
            "quantity",
            "unit_price",
            "discount_rate",
            "gross_revenue",
            "discount_amount",
            "net_revenue"
        ]
    );
    assert_eq!(numbers(&result, "gross_revenue"), vec![1000.0, 3000.0, 3000.0]);
    assert_eq!(numbers(&result, "discount_amount"), vec![100.0, 150.0, 0.0]);
    assert_eq!(numbers(&result, "net_revenue"), vec![900.0, 2850.0, 3000.0]);

    // The caller's table is untouched
    assert_eq!(input, order_table());
}

#[test]
fn test_aggregates_stay_out_of_table_but_are_referenceable() {
    let table = sales_table();
    let rules = vec![
        rule("total_revenue", "SUM(revenue)"),
        rule("revenue_share", "revenue / total_revenue"),
        rule("by_region", "SUM(revenue)")
            .grouped_by(&["region"])
            .unwrap(),
    ];

    let evaluation = engine().apply_all(&table, &rules).unwrap();

    assert!(!evaluation.table.contains_column("total_revenue"));
    assert!(!evaluation.table.contains_column("by_region"));
    assert_eq!(
        numbers(&evaluation.table, "revenue_share"),
        vec![0.1, 0.2, 0.15, 0.3, 0.25]
    );

    let reduced: Vec<&str> = evaluation.computed.reduced().map(|(name, _)| name).collect();
    assert_eq!(reduced, vec!["total_revenue", "by_region"]);
    assert_eq!(evaluation.computed.len(), 3);
}

#[test]
fn test_aggregate_over_computed_column() {
    let rules = vec![
        rule("gross_revenue", "quantity * unit_price"),
        rule("total_gross", "SUM(gross_revenue)"),
    ];
    let evaluation = engine().apply_all(&order_table(), &rules).unwrap();
    let total = evaluation
        .computed
        .get("total_gross")
        .and_then(RuleOutput::as_reduced)
        .and_then(ReducedSeries::as_scalar);
    assert_eq!(total, Some(7000.0));
}

#[test]
fn test_grouped_aggregate_cannot_feed_arithmetic() {
    let rules = vec![
        rule("by_region", "SUM(revenue)")
            .grouped_by(&["region"])
            .unwrap(),
        rule("bad", "revenue / by_region"),
    ];
    let err = engine().apply_all(&sales_table(), &rules).unwrap_err();
    assert!(matches!(err, CalcError::Rule { ref rule, .. } if rule == "bad"));
    assert!(matches!(err.root_cause(), CalcError::Type(_)));
}

#[test]
fn test_rule_can_overwrite_column() {
    let rules = vec![rule("quantity", "quantity * 2")];
    let result = engine().apply_multiple_rules(&order_table(), &rules).unwrap();
    assert_eq!(numbers(&result, "quantity"), vec![20.0, 40.0, 30.0]);
    assert_eq!(result.columns().len(), 3);
}

#[test]
fn test_first_failing_rule_aborts_sequence() {
    let rules = vec![
        rule("gross_revenue", "quantity * unit_price"),
        rule("broken", "missing * 2"),
        rule("also_broken", "other_missing * 2"),
    ];
    let err = engine().apply_multiple_rules(&order_table(), &rules).unwrap_err();
    match &err {
        CalcError::Rule { rule, .. } => assert_eq!(rule, "broken"),
        other => panic!("Expected rule error, got {:?}", other),
    }
    assert!(matches!(err.root_cause(), CalcError::UnknownReference(n) if n == "missing"));
}

#[test]
fn test_later_rules_cannot_see_future_results() {
    let rules = vec![
        rule("a", "b * 2"),
        rule("b", "quantity"),
    ];
    let err = engine().apply_multiple_rules(&order_table(), &rules).unwrap_err();
    assert!(matches!(err.root_cause(), CalcError::UnknownReference(n) if n == "b"));
}

#[test]
fn test_empty_rule_list_returns_copy() {
    let table = order_table();
    let result = engine().apply_multiple_rules(&table, &[]).unwrap();
    assert_eq!(result, table);
}

#[test]
fn test_ragged_table_is_rejected() {
    let table = Table::from_columns([
        Column::new("revenue", ColumnValue::Number(vec![1.0, 2.0, 3.0])),
        Column::new("region", ColumnValue::text(&["N", "S"])),
    ]);
    let by_region = rule("by_region", "SUM(revenue)")
        .grouped_by(&["region"])
        .unwrap();

    let err = engine()
        .apply_formula(&table, &by_region, &ComputedColumns::new())
        .unwrap_err();
    assert!(matches!(err.root_cause(), CalcError::Validation(msg) if msg.contains("'region'")));

    let err = engine().apply_all(&table, &[by_region]).unwrap_err();
    assert!(matches!(err.root_cause(), CalcError::Validation(_)));
}
