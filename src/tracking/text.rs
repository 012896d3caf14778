//! Display formatting shared by the API and report export

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder for missing values in reports
pub const NOT_AVAILABLE: &str = "n/a";

fn activity_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| {
        Regex::new(r"\s*\d+\.\s*|\s*;\s*|\n+").expect("separator regex is valid")
    })
}

/// Split an activities text into list items.
///
/// Numbered (`1. foo 2. bar`), semicolon separated and multi-line texts
/// become several items; anything else stays a single trimmed item.
pub fn bulletize(text: &str) -> Vec<String> {
    let parts: Vec<String> = activity_separator()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if parts.len() <= 1 {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }
    parts
}

/// Group an integer string with commas
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `1234.5` becomes `1,234.50`
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, group_thousands(int_part), frac)
}

/// Philippine peso amount, e.g. `₱1,234.56`
pub fn format_peso(amount: f64) -> String {
    format!("₱{}", format_amount(amount))
}

/// Optional peso amount, `n/a` when absent
pub fn format_peso_opt(amount: Option<f64>) -> String {
    amount.map(format_peso).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// `12.5` becomes `12.50%`
pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Trimmed text or `n/a` when blank
pub fn or_na(value: &str) -> String {
    if value.trim().is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

/// Integers without a fractional part, others with up to two decimals
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let s = format!("{:.2}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
