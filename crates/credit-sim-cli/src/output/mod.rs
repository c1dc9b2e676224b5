pub mod csv_out;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("JSON serialization error: {}", e),
        },
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// The `result` of an output envelope, or the value itself.
pub(crate) fn result_of(value: &Value) -> &Value {
    value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value)
}

/// Scalar fields of the result and its `statistics`, with nested objects
/// flattened one level as `parent.child`.
pub(crate) fn headline_fields(value: &Value) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let result = result_of(value);
    collect_scalars(result, "", &mut fields);
    if let Some(stats) = result.get("statistics") {
        collect_scalars(stats, "", &mut fields);
    }
    fields
}

fn collect_scalars(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    let Value::Object(map) = value else { return };
    for (key, val) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            Value::Object(_) if prefix.is_empty() && key != "statistics" => {
                collect_scalars(val, &name, out)
            }
            Value::Object(_) | Value::Array(_) => {}
            _ => out.push((name, scalar_text(val))),
        }
    }
}

/// The row-shaped section of a result: per-debtor summaries, yearly
/// statistics or schedule periods. Percentile bands collapse to their median.
pub(crate) fn rows(value: &Value) -> Option<(&'static str, Vec<Map<String, Value>>)> {
    let result = result_of(value);
    let stats = result.get("statistics");
    let (title, items) = if let Some(Value::Array(debtors)) = stats.and_then(|s| s.get("debtors")) {
        ("Debtors", debtors)
    } else if let Some(Value::Array(years)) = stats.and_then(|s| s.get("years")) {
        ("Years", years)
    } else if let Some(Value::Array(periods)) = result.get("periods") {
        ("Schedule", periods)
    } else {
        return None;
    };

    let rows = items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            let mut row = Map::new();
            for (key, val) in item {
                match val {
                    Value::Object(band) => {
                        if let Some(p50) = band.get("p50") {
                            row.insert(format!("{key}_p50"), p50.clone());
                        }
                    }
                    Value::Array(_) => {}
                    _ => {
                        row.insert(key.clone(), val.clone());
                    }
                }
            }
            row
        })
        .collect();
    Some((title, rows))
}

pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
