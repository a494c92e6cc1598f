use std::fmt;
use std::time::Duration;

/// Parse a chunk length such as `4`, `2.5s`, `500ms` or `1m30s`.
///
/// # Grammar
///
/// ```text
/// duration  = component { separators component } | number ;
/// component = number separators? unit ;
/// number    = digits [ "." digits ] ;
/// unit      = "ms" | "s" | "m" | "h" ;
/// separators = { whitespace | "_" } ;
/// ```
///
/// A lone number without a unit is taken as seconds. Each unit may appear at
/// most once and the total must be greater than zero.
pub fn parse_duration(value: &str) -> Result<Duration, DurationParseError> {
    parse(value, false)
}

/// Parse an overlap length. Same grammar as [`parse_duration`], but zero is
/// accepted.
pub fn parse_overlap(value: &str) -> Result<Duration, DurationParseError> {
    parse(value, true)
}

fn parse(value: &str, allow_zero: bool) -> Result<Duration, DurationParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let bytes = trimmed.as_bytes();
    let mut index = 0usize;
    let mut seen_units = [false; Unit::COUNT];
    let mut total_nanos: u128 = 0;
    let mut components = 0usize;

    while index < bytes.len() {
        skip_separators(bytes, &mut index);
        if index >= bytes.len() {
            break;
        }

        let (mantissa, scale) = parse_number(bytes, &mut index)?;
        skip_separators(bytes, &mut index);

        let unit = if index >= bytes.len() && components == 0 {
            Unit::Second
        } else {
            parse_unit(trimmed, &mut index)?
        };

        if std::mem::replace(&mut seen_units[unit as usize], true) {
            return Err(DurationParseError::DuplicateUnit(unit));
        }

        let divisor = 10u128
            .checked_pow(scale)
            .ok_or(DurationParseError::TooPrecise(unit))?;
        let product = mantissa
            .checked_mul(unit.nanos())
            .ok_or(DurationParseError::TooLarge)?;
        if product % divisor != 0 {
            return Err(DurationParseError::TooPrecise(unit));
        }

        total_nanos = total_nanos
            .checked_add(product / divisor)
            .ok_or(DurationParseError::TooLarge)?;
        components += 1;
    }

    if total_nanos == 0 && !allow_zero {
        return Err(DurationParseError::Zero);
    }

    let secs =
        u64::try_from(total_nanos / 1_000_000_000).map_err(|_| DurationParseError::TooLarge)?;
    Ok(Duration::new(secs, (total_nanos % 1_000_000_000) as u32))
}

fn parse_number(bytes: &[u8], index: &mut usize) -> Result<(u128, u32), DurationParseError> {
    let start = *index;
    let mut mantissa: u128 = 0;
    let mut scale = 0u32;
    let mut decimal_at = None;

    while let Some(&byte) = bytes.get(*index) {
        match byte {
            b'0'..=b'9' => {
                mantissa = mantissa
                    .checked_mul(10)
                    .and_then(|m| m.checked_add(u128::from(byte - b'0')))
                    .ok_or(DurationParseError::TooLarge)?;
                if decimal_at.is_some() {
                    scale += 1;
                }
            }
            b'.' if decimal_at.is_none() => decimal_at = Some(*index),
            _ => break,
        }
        *index += 1;
    }

    if *index == start || (decimal_at == Some(start) && scale == 0) {
        return Err(DurationParseError::ExpectedNumber {
            index: start,
            found: bytes.get(start).map(|&b| b as char),
        });
    }
    if let (Some(at), 0) = (decimal_at, scale) {
        return Err(DurationParseError::MissingFractionDigits { index: at });
    }

    Ok((mantissa, scale))
}

fn parse_unit(original: &str, index: &mut usize) -> Result<Unit, DurationParseError> {
    let rest = &original[*index..];
    let letters = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let word = &rest[..letters];

    let unit = match word {
        "ms" => Unit::Millisecond,
        "s" => Unit::Second,
        "m" => Unit::Minute,
        "h" => Unit::Hour,
        "" => {
            return Err(DurationParseError::ExpectedUnit {
                index: *index,
                found: rest.chars().next(),
            })
        }
        other => {
            return Err(DurationParseError::UnknownUnit {
                index: *index,
                found: other.to_owned(),
            })
        }
    };
    *index += word.len();
    Ok(unit)
}

fn skip_separators(bytes: &[u8], index: &mut usize) {
    while bytes
        .get(*index)
        .is_some_and(|b| *b == b'_' || b.is_ascii_whitespace())
    {
        *index += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    Empty,
    ExpectedNumber { index: usize, found: Option<char> },
    ExpectedUnit { index: usize, found: Option<char> },
    UnknownUnit { index: usize, found: String },
    MissingFractionDigits { index: usize },
    DuplicateUnit(Unit),
    TooPrecise(Unit),
    Zero,
    TooLarge,
}

impl std::error::Error for DurationParseError {}

impl fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationParseError::Empty => write!(f, "duration cannot be empty"),
            DurationParseError::ExpectedNumber { index, found: Some(ch) } => {
                write!(f, "expected a number at position {} but found '{ch}'", index + 1)
            }
            DurationParseError::ExpectedNumber { index, found: None } => {
                write!(f, "expected a number at position {}", index + 1)
            }
            DurationParseError::ExpectedUnit { index, found: Some(ch) } => {
                write!(f, "expected a unit at position {} but found '{ch}'", index + 1)
            }
            DurationParseError::ExpectedUnit { index, found: None } => {
                write!(f, "expected a unit at position {}", index + 1)
            }
            DurationParseError::UnknownUnit { index, found } => {
                write!(f, "unknown unit '{found}' at position {}", index + 1)
            }
            DurationParseError::MissingFractionDigits { index } => write!(
                f,
                "expected digits after decimal point at position {}",
                index + 1
            ),
            DurationParseError::DuplicateUnit(unit) => {
                write!(f, "unit '{}' appears more than once", unit.symbol())
            }
            DurationParseError::TooPrecise(unit) => write!(
                f,
                "fraction is finer than a nanosecond for unit '{}'",
                unit.symbol()
            ),
            DurationParseError::Zero => write!(f, "duration must be greater than zero"),
            DurationParseError::TooLarge => write!(f, "duration is too large"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Unit {
    Millisecond,
    Second,
    Minute,
    Hour,
}

impl Unit {
    const COUNT: usize = 4;

    fn nanos(self) -> u128 {
        match self {
            Unit::Millisecond => 1_000_000,
            Unit::Second => 1_000_000_000,
            Unit::Minute => 60 * 1_000_000_000,
            Unit::Hour => 3_600 * 1_000_000_000,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::Minute => "m",
            Unit::Hour => "h",
        }
    }
}
