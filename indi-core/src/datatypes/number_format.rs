//! Number element display formats
//!
//! A number element carries a printf-style format that drives how its value
//! is shown to users. Two families exist:
//!
//! - standard conversions `%[flags][width][.precision](f|e|E|g|G)`
//! - sexagesimal `%<w>.<f>m`, where `f` selects the shape of the output:
//!
//! | f | output        |
//! |---|---------------|
//! | 3 | `:mm`         |
//! | 5 | `:mm.m`       |
//! | 6 | `:mm:ss`      |
//! | 8 | `:mm:ss.s`    |
//! | 9 | `:mm:ss.ss`   |
//!
//! Wire values are always plain decimals; the format only matters for
//! display and for parsing user-entered text.

use crate::error::{IndiError, IndiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Flags of a standard printf conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintfFlags {
    pub left_justify: bool,
    pub plus_sign: bool,
    pub space_sign: bool,
    pub zero_pad: bool,
    pub alternate: bool,
}

/// Parsed shape of a number format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStyle {
    Printf {
        flags: PrintfFlags,
        width: usize,
        precision: Option<usize>,
        conversion: char,
    },
    Sexagesimal {
        width: usize,
        fraction: u8,
    },
}

/// Validated number format, keeping the original pattern text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumberFormat {
    pattern: String,
    style: FormatStyle,
}

impl NumberFormat {
    /// Validate a format pattern
    ///
    /// # Errors
    ///
    /// Returns `IndiError::BadFormat` when the pattern does not start with
    /// `%`, does not end with one of `feEgGm`, or has a malformed body
    pub fn parse(pattern: &str) -> IndiResult<Self> {
        let trimmed = pattern.trim();
        let bad = || IndiError::BadFormat(format!("Invalid number format: {}", pattern));

        let body = trimmed.strip_prefix('%').ok_or_else(bad)?;
        let conversion = body.chars().last().ok_or_else(bad)?;
        let body = &body[..body.len() - conversion.len_utf8()];

        let style = match conversion {
            'm' => parse_sexagesimal_style(body).ok_or_else(bad)?,
            'f' | 'e' | 'E' | 'g' | 'G' => parse_printf_style(body, conversion).ok_or_else(bad)?,
            _ => return Err(bad()),
        };

        Ok(Self {
            pattern: trimmed.to_string(),
            style,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn style(&self) -> FormatStyle {
        self.style
    }

    pub fn is_sexagesimal(&self) -> bool {
        matches!(self.style, FormatStyle::Sexagesimal { .. })
    }

    /// Render a value for display
    pub fn format(&self, value: f64) -> String {
        match self.style {
            FormatStyle::Printf {
                flags,
                width,
                precision,
                conversion,
            } => format_printf(value, flags, width, precision, conversion),
            FormatStyle::Sexagesimal { width, fraction } => {
                format_sexagesimal(value, width, fraction)
            }
        }
    }

    /// Parse user text according to this format
    ///
    /// # Errors
    ///
    /// Returns `IndiError::BadFormat` when the text is not a number in the
    /// expected notation
    pub fn parse_value(&self, text: &str) -> IndiResult<f64> {
        match self.style {
            FormatStyle::Sexagesimal { .. } => parse_sexagesimal(text),
            FormatStyle::Printf { .. } => parse_decimal(text),
        }
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            pattern: "%g".to_string(),
            style: FormatStyle::Printf {
                flags: PrintfFlags::default(),
                width: 0,
                precision: None,
                conversion: 'g',
            },
        }
    }
}

impl FromStr for NumberFormat {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NumberFormat {
    type Error = IndiError;

    fn try_from(value: String) -> IndiResult<Self> {
        Self::parse(&value)
    }
}

impl From<NumberFormat> for String {
    fn from(value: NumberFormat) -> Self {
        value.pattern
    }
}

impl fmt::Display for NumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn parse_sexagesimal_style(body: &str) -> Option<FormatStyle> {
    let (width, fraction) = body.split_once('.')?;
    let width = parse_digits(width)?;
    let fraction = parse_digits(fraction)?;

    match fraction {
        3 | 5 | 6 | 8 | 9 => Some(FormatStyle::Sexagesimal {
            width,
            fraction: fraction as u8,
        }),
        _ => None,
    }
}

fn parse_printf_style(body: &str, conversion: char) -> Option<FormatStyle> {
    let mut flags = PrintfFlags::default();
    let mut rest = body;

    while let Some(c) = rest.chars().next() {
        match c {
            '-' => flags.left_justify = true,
            '+' => flags.plus_sign = true,
            ' ' => flags.space_sign = true,
            '0' => flags.zero_pad = true,
            '#' => flags.alternate = true,
            _ => break,
        }
        rest = &rest[1..];
    }

    let (width_text, precision_text) = match rest.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (rest, None),
    };

    let width = if width_text.is_empty() {
        0
    } else {
        parse_digits(width_text)?
    };

    // "%.f" means precision zero
    let precision = match precision_text {
        Some("") => Some(0),
        Some(p) => Some(parse_digits(p)?),
        None => None,
    };

    Some(FormatStyle::Printf {
        flags,
        width,
        precision,
        conversion,
    })
}

fn parse_digits(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn format_printf(
    value: f64,
    flags: PrintfFlags,
    width: usize,
    precision: Option<usize>,
    conversion: char,
) -> String {
    let precision = precision.unwrap_or(6);
    let magnitude = value.abs();

    let digits = if !value.is_finite() {
        let text = if value.is_nan() { "nan" } else { "inf" };
        if conversion.is_ascii_uppercase() {
            text.to_ascii_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match conversion {
            'f' => format!("{:.*}", precision, magnitude),
            'e' | 'E' => format_exponent(magnitude, precision, conversion == 'E'),
            _ => format_general(magnitude, precision, conversion == 'G', flags.alternate),
        }
    };

    let sign = if value.is_sign_negative() && !value.is_nan() {
        "-"
    } else if flags.plus_sign {
        "+"
    } else if flags.space_sign {
        " "
    } else {
        ""
    };

    let length = sign.len() + digits.len();
    if length >= width {
        return format!("{}{}", sign, digits);
    }

    let padding = width - length;
    if flags.left_justify {
        format!("{}{}{}", sign, digits, " ".repeat(padding))
    } else if flags.zero_pad && value.is_finite() {
        format!("{}{}{}", sign, "0".repeat(padding), digits)
    } else {
        format!("{}{}{}", " ".repeat(padding), sign, digits)
    }
}

/// Split Rust's exponent output into mantissa and exponent
fn split_exponent(magnitude: f64, precision: usize) -> (String, i32) {
    let text = format!("{:.*e}", precision, magnitude);
    match text.split_once('e') {
        Some((mantissa, exponent)) => (mantissa.to_string(), exponent.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

fn format_exponent(magnitude: f64, precision: usize, upper: bool) -> String {
    let (mantissa, exponent) = split_exponent(magnitude, precision);
    join_exponent(&mantissa, exponent, upper)
}

fn join_exponent(mantissa: &str, exponent: i32, upper: bool) -> String {
    format!(
        "{}{}{}{:02}",
        mantissa,
        if upper { 'E' } else { 'e' },
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

fn format_general(magnitude: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let significant = precision.max(1);
    let (_, exponent) = split_exponent(magnitude, significant - 1);

    if exponent >= -4 && (exponent as i64) < significant as i64 {
        let decimals = (significant as i64 - 1 - exponent as i64) as usize;
        let text = format!("{:.*}", decimals, magnitude);
        if alternate {
            text
        } else {
            strip_trailing_zeros(&text)
        }
    } else {
        let (mantissa, exponent) = split_exponent(magnitude, significant - 1);
        let mantissa = if alternate {
            mantissa
        } else {
            strip_trailing_zeros(&mantissa)
        };
        join_exponent(&mantissa, exponent, upper)
    }
}

fn strip_trailing_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn format_sexagesimal(value: f64, width: usize, fraction: u8) -> String {
    let negative = value < 0.0;
    let magnitude = value.abs();
    let mut degrees = magnitude.floor();
    let remainder = magnitude - degrees;

    let body = if fraction < 6 {
        let (field_width, decimals) = if fraction == 5 { (4, 1) } else { (2, 0) };
        let mut minutes = remainder * 60.0;
        if rounds_to_sixty(minutes, field_width, decimals) {
            minutes = 0.0;
            degrees += 1.0;
        }
        format!(
            "{}:{:0w$.p$}",
            degrees,
            minutes,
            w = field_width,
            p = decimals
        )
    } else {
        let (field_width, decimals) = match fraction {
            8 => (4, 1),
            9 => (5, 2),
            _ => (2, 0),
        };
        let mut minutes = (remainder * 60.0).floor();
        let mut seconds = (remainder - minutes / 60.0) * 3600.0;
        if rounds_to_sixty(seconds, field_width, decimals) {
            seconds = 0.0;
            minutes += 1.0;
        }
        if minutes >= 60.0 {
            minutes = 0.0;
            degrees += 1.0;
        }
        format!(
            "{}:{:02.0}:{:0w$.p$}",
            degrees,
            minutes,
            seconds,
            w = field_width,
            p = decimals
        )
    };

    let signed = if negative { format!("-{}", body) } else { body };
    format!("{:>width$}", signed, width = width)
}

fn rounds_to_sixty(value: f64, width: usize, decimals: usize) -> bool {
    format!("{:0w$.p$}", value, w = width, p = decimals)
        .parse::<f64>()
        .is_ok_and(|v| v >= 60.0)
}

fn parse_decimal(text: &str) -> IndiResult<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .map_err(|_| IndiError::BadFormat(format!("Number value not correct: {}", text)))
}

/// Parse a sexagesimal value such as `-12:30:36`, `12 30` or `12;30.5`
///
/// At most three components are accepted. The sign is taken from the
/// degrees component, so `-0:30` is negative.
///
/// # Errors
///
/// Returns `IndiError::BadFormat` for too many components, unparseable
/// components or negative minutes/seconds
pub fn parse_sexagesimal(text: &str) -> IndiResult<f64> {
    let bad = |reason: &str| IndiError::BadFormat(format!("{}: {}", reason, text));

    let normalized: String = text
        .trim()
        .chars()
        .map(|c| if c == ' ' || c == ';' { ':' } else { c })
        .collect();

    if normalized.matches(':').count() > 2 {
        return Err(bad("Too many sexagesimal components"));
    }

    let mut parts = normalized.split(':').filter(|p| !p.is_empty());
    let degrees: f64 = parts
        .next()
        .ok_or_else(|| bad("Empty sexagesimal value"))?
        .parse()
        .map_err(|_| bad("Invalid degrees"))?;

    let mut minutes = 0.0;
    let mut seconds = 0.0;
    if let Some(part) = parts.next() {
        minutes = part.parse().map_err(|_| bad("Invalid minutes"))?;
    }
    if let Some(part) = parts.next() {
        seconds = part.parse().map_err(|_| bad("Invalid seconds"))?;
    }

    if minutes < 0.0 || seconds < 0.0 {
        return Err(bad("Negative minutes or seconds"));
    }

    let offset = minutes / 60.0 + seconds / 3600.0;
    if degrees.is_sign_positive() {
        Ok(degrees + offset)
    } else {
        Ok(degrees - offset)
    }
}

/// Parse a number as it arrives from a peer
///
/// Plain decimals are the norm, but sexagesimal text is accepted too.
pub fn parse_wire_number(text: &str) -> IndiResult<f64> {
    let text = text.trim();
    if text.contains(':') || text.contains(';') || text.contains(' ') {
        parse_sexagesimal(text)
    } else {
        parse_decimal(text)
    }
}

/// Render a number for the wire
pub fn format_wire_number(value: f64) -> String {
    format!("{:?}", value)
}
