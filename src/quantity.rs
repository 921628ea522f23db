//! # Quantity Parsing Module
//!
//! Splits free-text quantities such as "400g", "4,5" or "2 bouteilles" into a
//! numeric magnitude and a unit token, and renders summed quantities back for
//! display on the shopping list.
//!
//! ## Rules
//!
//! - A leading integer or decimal is the magnitude; both `.` and `,` are
//!   accepted as the decimal separator
//! - Whatever follows the number (trimmed) is the unit
//! - Without a leading number the whole string is the unit and the magnitude
//!   is absent ("quelques", "une pincée")

use lazy_static::lazy_static;
use log::trace;
use regex::Regex;

/// Leading number followed by an optional unit
const QUANTITY_PATTERN: &str = r"^(\d+(?:[.,]\d+)?)\s*(.*)$";

lazy_static! {
    static ref QUANTITY_REGEX: Regex =
        Regex::new(QUANTITY_PATTERN).expect("Quantity pattern should be valid");
}

/// Longest unit glued to its number when displayed ("400g", "2cl")
const MAX_COMPACT_UNIT_LEN: usize = 2;

/// A quantity split into magnitude and unit
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuantity {
    pub value: Option<f64>,
    pub unit: String,
}

impl ParsedQuantity {
    /// Unit used as a grouping key: lowercased and trimmed
    pub fn unit_key(&self) -> String {
        self.unit.trim().to_lowercase()
    }
}

/// Parse a free-text quantity
///
/// # Examples
///
/// ```rust
/// use mealplan::quantity::parse_quantity;
///
/// let parsed = parse_quantity("400g");
/// assert_eq!(parsed.value, Some(400.0));
/// assert_eq!(parsed.unit, "g");
///
/// let parsed = parse_quantity("quelques");
/// assert_eq!(parsed.value, None);
/// assert_eq!(parsed.unit, "quelques");
/// ```
pub fn parse_quantity(text: &str) -> ParsedQuantity {
    let trimmed = text.trim();

    if let Some(captures) = QUANTITY_REGEX.captures(trimmed) {
        let number = captures[1].replace(',', ".");
        if let Ok(value) = number.parse::<f64>() {
            let unit = captures[2].trim().to_string();
            trace!("Parsed quantity '{}' -> value={}, unit='{}'", text, value, unit);
            return ParsedQuantity {
                value: Some(value),
                unit,
            };
        }
    }

    trace!("No leading number in quantity '{}'", text);
    ParsedQuantity {
        value: None,
        unit: trimmed.to_string(),
    }
}

/// Parse an optional quantity; a missing quantity has no value and no unit
pub fn parse_optional_quantity(text: Option<&str>) -> ParsedQuantity {
    parse_quantity(text.unwrap_or_default())
}

/// Render a summed quantity with its unit
///
/// Whole numbers lose their decimals, other values keep at most two decimals
/// without trailing zeros. Short alphabetic units are glued to the number.
///
/// ```rust
/// use mealplan::quantity::format_aggregated_quantity;
///
/// assert_eq!(format_aggregated_quantity(Some(10.0), "oeufs"), "10 oeufs");
/// assert_eq!(format_aggregated_quantity(Some(400.0), "g"), "400g");
/// assert_eq!(format_aggregated_quantity(None, "oeufs"), "oeufs");
/// ```
pub fn format_aggregated_quantity(value: Option<f64>, unit: &str) -> String {
    let unit = unit.trim();

    let Some(value) = value else {
        return unit.to_string();
    };

    let number = format_number(value);
    if unit.is_empty() {
        number
    } else if is_compact_unit(unit) {
        format!("{number}{unit}")
    } else {
        format!("{number} {unit}")
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        return format!("{value:.0}");
    }

    let fixed = format!("{value:.2}");
    fixed
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn is_compact_unit(unit: &str) -> bool {
    unit.chars().count() <= MAX_COMPACT_UNIT_LEN && unit.chars().all(char::is_alphabetic)
}
