//! Amount formatting. Currency and locale stay the caller's concern: pass a
//! [`MoneyFormatter`] to the renderer, otherwise [`format_amount`] is used.

use std::sync::Arc;

pub type MoneyFormatter = Arc<dyn Fn(f64) -> String + Send + Sync>;

/// Two decimals with comma thousands separators: `1234.5` → `"1,234.50"`.
pub fn format_amount(amount: f64) -> String {
    if !amount.is_finite() {
        return amount.to_string();
    }
    let cents = (amount.abs() * 100.0).round() as u128;
    let whole = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction:02}")
}
