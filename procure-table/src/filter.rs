//! Client-side narrowing and ordering of loaded rows.
//!
//! Everything here is pure: filtering and sorting never touch the cache.

use std::cmp::Ordering;

use procure_fields::path::{self, is_blank, text_of};
use procure_fields::Value;

use crate::spec::{Comparator, FilterSpec, SortDirection};

/// Rows passing every active filter, in their original order.
///
/// `values` is the filter form's value tree keyed by filter name. Blank
/// filter values are inactive.
pub fn apply_filters(rows: &[Value], filters: &[FilterSpec], values: &Value) -> Vec<Value> {
    let active: Vec<(&FilterSpec, &Value)> = filters
        .iter()
        .filter_map(|filter| {
            let value = path::get(values, &filter.field.path())?;
            (!is_blank(Some(value))).then_some((filter, value))
        })
        .collect();

    rows.iter()
        .filter(|row| {
            active.iter().all(|(filter, wanted)| {
                let cell = path::get(row, &filter.column_path());
                matches(filter.comparator, cell, wanted)
            })
        })
        .cloned()
        .collect()
}

/// Whether a row value satisfies one active filter. A missing cell never
/// matches.
pub fn matches(comparator: Comparator, cell: Option<&Value>, wanted: &Value) -> bool {
    let Some(cell) = cell.filter(|c| !c.is_null()) else {
        return false;
    };
    match comparator {
        Comparator::Eq => same(cell, wanted),
        Comparator::Contains => text_of(cell)
            .to_lowercase()
            .contains(&text_of(wanted).to_lowercase()),
        Comparator::Gte => compare(cell, wanted) != Ordering::Less,
        Comparator::Lte => compare(cell, wanted) != Ordering::Greater,
        Comparator::In => match wanted {
            Value::Array(choices) => choices.iter().any(|choice| same(cell, choice)),
            single => same(cell, single),
        },
        Comparator::Between => {
            let bounds = wanted.as_array().map(Vec::as_slice).unwrap_or_default();
            let low = bounds.first().filter(|v| !is_blank(Some(*v)));
            let high = bounds.get(1).filter(|v| !is_blank(Some(*v)));
            low.is_none_or(|low| compare(cell, low) != Ordering::Less)
                && high.is_none_or(|high| compare(cell, high) != Ordering::Greater)
        }
    }
}

/// Equality that treats `5` and `"5"` alike, since filter inputs are often
/// text while rows carry numbers.
fn same(a: &Value, b: &Value) -> bool {
    a == b || text_of(a) == text_of(b)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric when both sides are numbers, else text order
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => text_of(a).cmp(&text_of(b)),
    }
}

/// Stable sort by the value at `column`; missing and null values go last in
/// both directions.
pub fn sort_rows(rows: &mut [Value], column: &procure_fields::FieldPath, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let a = path::get(a, column).filter(|v| !v.is_null());
        let b = path::get(b, column).filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => match direction {
                SortDirection::Asc => compare(a, b),
                SortDirection::Desc => compare(b, a),
            },
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_fields::{FieldPath, FieldSpec};
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "Steel", "price": 10, "status": "active"}),
            json!({"id": 2, "name": "Stainless steel", "price": 25, "status": "draft"}),
            json!({"id": 3, "name": "Copper", "price": 40, "status": "active"}),
            json!({"id": 4, "name": "Tin", "status": null}),
        ]
    }

    fn ids(rows: &[Value]) -> Vec<i64> {
        rows.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[test]
    fn blank_values_do_not_narrow() {
        let filters = vec![FilterSpec::new(FieldSpec::text("name", "Name"), Comparator::Contains)];
        for blank in [json!({}), json!({"name": ""}), json!({"name": null}), json!({"name": []})] {
            assert_eq!(ids(&apply_filters(&rows(), &filters, &blank)), vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn contains_ignores_case() {
        let filters = vec![FilterSpec::new(FieldSpec::text("q", "Search"), Comparator::Contains)
            .on_column("name")];
        let out = apply_filters(&rows(), &filters, &json!({"q": "STEEL"}));
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[test]
    fn filters_combine() {
        let filters = vec![
            FilterSpec::new(FieldSpec::text("status", "Status"), Comparator::Eq),
            FilterSpec::new(FieldSpec::number("minPrice", "Min"), Comparator::Gte).on_column("price"),
        ];
        let out = apply_filters(&rows(), &filters, &json!({"status": "active", "minPrice": "20"}));
        assert_eq!(ids(&out), vec![3]);
    }

    #[test]
    fn in_and_between() {
        assert!(matches(Comparator::In, Some(&json!(2)), &json!([1, 2])));
        assert!(!matches(Comparator::In, Some(&json!(3)), &json!([1, 2])));
        assert!(matches(Comparator::Between, Some(&json!(25)), &json!([10, 25])));
        assert!(matches(Comparator::Between, Some(&json!(99)), &json!([10, null])));
        assert!(!matches(Comparator::Between, Some(&json!(5)), &json!([10, null])));
        assert!(matches(Comparator::Lte, Some(&json!("2024-01-01")), &json!("2024-02-01")));
    }

    #[test]
    fn missing_cell_fails_active_filter() {
        assert!(!matches(Comparator::Eq, None, &json!("x")));
        assert!(!matches(Comparator::Contains, Some(&Value::Null), &json!("x")));
    }

    #[test]
    fn sort_is_stable_with_nulls_last() {
        let path = FieldPath::parse("status");
        let mut asc = rows();
        sort_rows(&mut asc, &path, SortDirection::Asc);
        assert_eq!(ids(&asc), vec![1, 3, 2, 4]);

        let mut desc = rows();
        sort_rows(&mut desc, &path, SortDirection::Desc);
        assert_eq!(ids(&desc), vec![2, 1, 3, 4]);

        let mut by_price = rows();
        sort_rows(&mut by_price, &FieldPath::parse("price"), SortDirection::Desc);
        assert_eq!(ids(&by_price), vec![3, 2, 1, 4]);
    }
}
