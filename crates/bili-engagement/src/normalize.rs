//! Localized count parsing ("12.3万", "4.5K", "1,234").
//!
//! Total by contract: every input maps to a non-negative integer and parse
//! failures collapse to 0, because rendered markup is not trustworthy.

use std::sync::OnceLock;

use regex::Regex;

/// Magnitude markers in priority order.
const MAGNITUDES: &[(char, u64)] = &[
    ('万', 10_000),
    ('亿', 100_000_000),
    ('千', 1_000),
    ('K', 1_000),
    ('M', 1_000_000),
];

fn numeral_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)(?:\.([0-9]+))?").expect("numeral regex is valid"))
}

/// Convert a display count into an integer.
pub fn normalize_count(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '，')
        .collect();

    for &(marker, multiplier) in MAGNITUDES {
        if cleaned.contains(marker) {
            let rest = cleaned.replace(marker, "");
            if !rest.is_empty() {
                return scaled_numeral(&rest, multiplier).unwrap_or(0);
            }
        }
    }

    scaled_numeral(&cleaned, 1).unwrap_or(0)
}

/// Leading run of ASCII digits in `text`, if any.
///
/// Used where only an integer is expected (e.g. "1234 条评论").
pub fn leading_integer(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

/// First decimal numeral in `text` times `multiplier`, truncated toward zero.
///
/// Uses integer arithmetic on the fractional digits so "12.3" × 10 000 is
/// exactly 123 000.
fn scaled_numeral(text: &str, multiplier: u64) -> Option<u64> {
    let caps = numeral_re().captures(text)?;
    let whole = caps.get(1)?.as_str();
    let frac = caps.get(2).map(|m| m.as_str()).unwrap_or("");

    let whole: u128 = whole.parse().unwrap_or(u128::from(u64::MAX));
    let mut value = whole.saturating_mul(u128::from(multiplier));

    // Digits beyond 19 places cannot contribute once truncated.
    let frac = &frac[..frac.len().min(19)];
    if !frac.is_empty() {
        let numerator: u128 = frac.parse().unwrap_or(0);
        let denominator = 10u128.pow(frac.len() as u32);
        value = value.saturating_add(numerator * u128::from(multiplier) / denominator);
    }

    Some(u64::try_from(value).unwrap_or(u64::MAX))
}
