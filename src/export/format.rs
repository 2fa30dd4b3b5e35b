//! Brazilian-locale value cleanup applied per column format at export time.

use crate::models::ExcelFormat;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Drop `.` thousands separators: a dot preceded by a digit and followed by
/// exactly three digits. "1.234.567,89" → "1234567,89" | "1.5" → "1.5"
fn strip_thousands(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '.' && i > 0 && chars[i - 1].is_ascii_digit() {
            let group = chars[i + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
            if group == 3 {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Parse a Brazilian-formatted number.
/// "R$ 1.234,56" → 1234.56 | "11,3%" → 11.3 | "-0,45" → -0.45 | "N/A" → None
pub fn parse_br_number(s: &str) -> Option<f64> {
    let cleaned = s.replace("R$", "").replace('%', "");
    let cleaned = strip_thousands(cleaned.trim()).replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric value as written for `format`; `None` for Text or when the value
/// does not parse.
fn clean_value(value: &str, format: ExcelFormat) -> Option<String> {
    let scale = match format {
        ExcelFormat::Text => return None,
        ExcelFormat::Number | ExcelFormat::Currency => 1.0,
        ExcelFormat::Percentage => 100.0,
    };
    parse_br_number(value).map(|n| (n / scale).to_string())
}

/// One column as written for `format`.
///
/// Numeric formats coerce the whole column: values that fail to parse are
/// blanked, unless nothing in the column parses, in which case it is written
/// unchanged. Text columns are untouched.
pub fn clean_column(values: &[&str], format: ExcelFormat) -> Vec<String> {
    let cleaned: Vec<Option<String>> = values.iter().map(|v| clean_value(v, format)).collect();
    if cleaned.iter().all(Option::is_none) {
        return values.iter().map(|v| v.to_string()).collect();
    }
    cleaned.into_iter().map(Option::unwrap_or_default).collect()
}
