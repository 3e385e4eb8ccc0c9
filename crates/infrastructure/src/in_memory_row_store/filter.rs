use std::cmp::Ordering;

use serde_json::Value;

use keyward_application::Row;

/// Evaluates a filter tree against one row.
///
/// Unknown operators and relational conditions match nothing.
pub(super) fn row_matches(filter: &Value, row: &Row) -> bool {
    let object = match filter {
        Value::Null => return true,
        Value::Object(object) => object,
        _ => return false,
    };

    object.iter().all(|(key, condition)| match key.as_str() {
        "_and" => condition
            .as_array()
            .is_some_and(|members| members.iter().all(|member| row_matches(member, row))),
        "_or" => condition
            .as_array()
            .is_some_and(|members| members.iter().any(|member| row_matches(member, row))),
        field => field_matches(row.get(field), condition),
    })
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    let Value::Object(operators) = condition else {
        return value.is_some_and(|value| loosely_equal(value, condition));
    };
    let value = value.unwrap_or(&Value::Null);

    operators.iter().all(|(operator, operand)| match operator.as_str() {
        "_eq" => loosely_equal(value, operand),
        "_neq" => !loosely_equal(value, operand),
        "_in" => operand.as_array().is_some_and(|candidates| contains(candidates, value)),
        "_nin" => operand.as_array().is_some_and(|candidates| !contains(candidates, value)),
        "_null" => value.is_null() == operand.as_bool().unwrap_or(true),
        "_nnull" => value.is_null() != operand.as_bool().unwrap_or(true),
        "_gt" => compare_values(value, operand).is_some_and(Ordering::is_gt),
        "_gte" => compare_values(value, operand).is_some_and(Ordering::is_ge),
        "_lt" => compare_values(value, operand).is_some_and(Ordering::is_lt),
        "_lte" => compare_values(value, operand).is_some_and(Ordering::is_le),
        "_contains" => match value {
            Value::String(stored) => operand
                .as_str()
                .is_some_and(|expected| stored.contains(expected)),
            Value::Array(items) => items.iter().any(|item| loosely_equal(item, operand)),
            _ => false,
        },
        _ => false,
    })
}

fn contains(candidates: &[Value], value: &Value) -> bool {
    candidates.iter().any(|candidate| loosely_equal(value, candidate))
}

/// Equality treating `1` and `1.0`, and numbers and their decimal strings, as equal.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }

    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

/// Orders numbers numerically and strings lexically; other pairs are unordered.
pub(super) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (as_number(left), as_number(right)) {
        return left.partial_cmp(&right);
    }

    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse::<f64>().ok(),
        _ => None,
    }
}
