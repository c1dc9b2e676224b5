use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::{headline_fields, rows, scalar_text};

/// Format output as tables: headline figures, then the row section.
pub fn print_table(value: &Value) {
    let fields = headline_fields(value);
    if !fields.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["Field", "Value"]);
        for (key, val) in &fields {
            builder.push_record([key.as_str(), val.as_str()]);
        }
        println!("{}", Table::from(builder));
    }

    if let Some((title, rows)) = rows(value) {
        if let Some(first) = rows.first() {
            let headers: Vec<String> = first.keys().cloned().collect();
            let mut builder = Builder::default();
            builder.push_record(headers.clone());
            for row in &rows {
                builder.push_record(
                    headers
                        .iter()
                        .map(|h| row.get(h).map(scalar_text).unwrap_or_default()),
                );
            }
            println!("\n{}:", title);
            println!("{}", Table::from(builder));
        }
    }

    if let Some(Value::Array(warnings)) = value.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }

    if let Some(Value::String(meth)) = value.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}
