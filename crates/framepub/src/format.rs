//! Process-wide number formatters for reports.
//!
//! Each formatter is built once on first use and never mutated.

use once_cell::sync::Lazy;

/// Fixed-precision number rendering with a unit suffix.
#[derive(Debug)]
pub struct NumberFormat {
    /// Digits after the decimal point.
    decimals: usize,
    /// Multiplier applied before rendering.
    scale: f64,
    /// Unit appended after the number.
    suffix: &'static str,
    /// Group integer digits in thousands.
    grouping: bool,
}

impl NumberFormat {
    /// Render `value`.
    pub fn format(&self, value: f64) -> String {
        let scaled = value * self.scale;
        let text = format!("{:.*}", self.decimals, scaled);
        let text = if self.grouping {
            group_thousands(&text)
        } else {
            text
        };
        format!("{text}{}", self.suffix)
    }

    /// Render an integer count.
    pub fn count(&self, value: u64) -> String {
        self.format(value as f64)
    }
}

/// Insert `,` between groups of three integer digits.
fn group_thousands(text: &str) -> String {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(r) => ("-", r),
        None => ("", text),
    };
    let (int, frac) = match rest.find('.') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}{frac}")
}

/// Rates, e.g. `10.0 Hz`.
pub static HERTZ: Lazy<NumberFormat> = Lazy::new(|| NumberFormat {
    decimals: 1,
    scale: 1.0,
    suffix: " Hz",
    grouping: false,
});

/// Durations given in milliseconds, e.g. `12.5 ms`.
pub static MILLIS: Lazy<NumberFormat> = Lazy::new(|| NumberFormat {
    decimals: 1,
    scale: 1.0,
    suffix: " ms",
    grouping: false,
});

/// Ratios in `[0, 1]` shown as percentages, e.g. `16.7%`.
pub static PERCENT: Lazy<NumberFormat> = Lazy::new(|| NumberFormat {
    decimals: 1,
    scale: 100.0,
    suffix: "%",
    grouping: false,
});

/// Whole counts with thousands separators, e.g. `12,345`.
pub static COUNT: Lazy<NumberFormat> = Lazy::new(|| NumberFormat {
    decimals: 0,
    scale: 1.0,
    suffix: "",
    grouping: true,
});
