use crate::spec::{Aggregation, ChartSpec};

/// Name of the plottable measure column for a spec: `<token>_<y>` when
/// aggregating, plain `y` otherwise. Every consumer goes through here.
pub fn resolve_value_column(spec: &ChartSpec) -> String {
    value_column_name(spec.aggregation, &spec.y)
}

pub fn value_column_name(aggregation: Aggregation, y: &str) -> String {
    match aggregation {
        Aggregation::None => y.to_string(),
        agg => format!("{}_{}", agg.token(), y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ChartType;
    use serde_json::json;

    #[test]
    fn test_aggregated_name() {
        let spec = ChartSpec::new(ChartType::Bar, "category", "price", Aggregation::Mean);
        assert_eq!(resolve_value_column(&spec), "mean_price");
    }

    #[test]
    fn test_unaggregated_name() {
        let spec = ChartSpec::new(ChartType::Line, "date", "price", Aggregation::None);
        assert_eq!(resolve_value_column(&spec), "price");
    }

    #[test]
    fn test_token_is_lowercased_and_canonical() {
        let spec = ChartSpec::from_json(&json!({"x": "c", "y": "price", "aggregation": "Average"})).unwrap();
        assert_eq!(resolve_value_column(&spec), "mean_price");
        let spec = ChartSpec::from_json(&json!({"x": "c", "y": "qty", "aggregation": "COUNT"})).unwrap();
        assert_eq!(resolve_value_column(&spec), "count_qty");
    }
}
