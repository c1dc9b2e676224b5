use serde_json::Value;
use std::io;

use super::{headline_fields, rows, scalar_text};

/// Write the row section as CSV, or field/value pairs when there is none.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match rows(value) {
        Some((_, rows)) if !rows.is_empty() => {
            let headers: Vec<String> = rows[0].keys().cloned().collect();
            let _ = wtr.write_record(&headers);
            for row in &rows {
                let record: Vec<String> = headers
                    .iter()
                    .map(|h| row.get(h).map(scalar_text).unwrap_or_default())
                    .collect();
                let _ = wtr.write_record(&record);
            }
        }
        _ => {
            let _ = wtr.write_record(["field", "value"]);
            for (key, val) in headline_fields(value) {
                let _ = wtr.write_record([key, val]);
            }
        }
    }

    let _ = wtr.flush();
}
