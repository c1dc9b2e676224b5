use serde_json::Value;

use super::{result_of, scalar_text};

/// Headline figure per command, most specific first.
const PRIORITY_KEYS: [&str; 4] = [
    "portfolio_default_probability",
    "probability_of_default",
    "expected_loss",
    "total_interest",
];

/// Print just the key answer value from the output.
pub fn print_minimal(value: &Value) {
    let result = result_of(value);
    let stats = result.get("statistics").unwrap_or(result);

    for key in PRIORITY_KEYS {
        if let Some(val) = stats.get(key).filter(|v| !v.is_null()) {
            println!("{}", scalar_text(val));
            return;
        }
    }

    if let Some((key, val)) = stats.as_object().and_then(|m| m.iter().next()) {
        println!("{}: {}", key, scalar_text(val));
        return;
    }
    println!("{}", scalar_text(stats));
}
