// SPDX-License-Identifier: MIT

//! Small value types shared by states and conditions: clinical codes and
//! exact-or-range quantities.

use serde::Serialize;
use std::fmt;

use super::schema::{FieldKind, FieldMeta, Reader, Requirement, TypeMeta};
use crate::sim::{RandomStream, Time, TimeUnit, ValidationError};
use crate::sim::time::shift;

/// A clinical code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Code {
    pub system: String,
    pub code: String,
    pub display: String,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.system, self.code, self.display)
    }
}

impl Code {
    pub fn parse(
        value: &serde_json::Value,
        context: String,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Code> {
        let r = Reader::open(value, "Code", context, errors)?;
        Some(Code {
            system: r.text("system")?,
            code: r.text("code")?,
            display: r.text("display")?,
        })
    }

    /// Every well-formed code in a list field
    pub fn parse_list(r: &Reader<'_>, field: &str, errors: &mut Vec<ValidationError>) -> Vec<Code> {
        r.items(field)
            .into_iter()
            .filter_map(|(context, item)| Code::parse(item, context, errors))
            .collect()
    }
}

/// A fixed quantity or a uniform range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount {
    Exact(f64),
    Range { low: f64, high: f64 },
}

impl Amount {
    pub fn sample(&self, rng: &mut RandomStream) -> f64 {
        match *self {
            Amount::Exact(quantity) => quantity,
            Amount::Range { low, high } => rng.uniform(low, high),
        }
    }

    /// Largest value the amount can take
    pub fn upper(&self) -> f64 {
        match *self {
            Amount::Exact(quantity) => quantity,
            Amount::Range { high, .. } => high,
        }
    }

    /// Read `exact` (`{quantity}`) or `range` (`{low, high}`) from a state node.
    /// When `timed` is set the nested object must also carry a `unit`.
    fn parse_fields(
        r: &Reader<'_>,
        timed: bool,
        errors: &mut Vec<ValidationError>,
    ) -> Option<(Amount, Option<TimeUnit>)> {
        let (exact_key, range_key) = if timed {
            ("TimedExact", "TimedRange")
        } else {
            ("Exact", "Range")
        };

        if let Some(value) = r.raw("exact") {
            let exact = Reader::open(value, exact_key, r.child("exact"), errors)?;
            let unit = parse_unit(&exact, errors);
            return Some((Amount::Exact(exact.number("quantity")?), unit));
        }

        let value = r.raw("range")?;
        let range = Reader::open(value, range_key, r.child("range"), errors)?;
        let unit = parse_unit(&range, errors);
        let (low, high) = (range.number("low")?, range.number("high")?);
        if low > high {
            range.error(errors, format!("Low bound {} is above high bound {}", low, high));
            return None;
        }
        Some((Amount::Range { low, high }, unit))
    }

    /// Unitless `exact` or `range` of a state node
    pub fn parse(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<Amount> {
        Self::parse_fields(r, false, errors).map(|(amount, _)| amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Exact(q) => write!(f, "{}", q),
            Amount::Range { low, high } => write!(f, "{} - {}", low, high),
        }
    }
}

/// An amount of simulated time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timespan {
    pub amount: Amount,
    pub unit: TimeUnit,
}

impl Timespan {
    /// `exact` or `range` with a required unit
    pub fn parse(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<Timespan> {
        match Amount::parse_fields(r, true, errors)? {
            (amount, Some(unit)) => Some(Timespan { amount, unit }),
            (_, None) => None,
        }
    }

    /// Parse a standalone `{quantity, unit}` object
    pub fn parse_exact(
        value: &serde_json::Value,
        context: String,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Timespan> {
        let r = Reader::open(value, "TimedExact", context, errors)?;
        let unit = parse_unit(&r, errors)?;
        Some(Timespan {
            amount: Amount::Exact(r.number("quantity")?),
            unit,
        })
    }

    /// Parse a standalone `{low, high, unit}` object
    pub fn parse_range(
        value: &serde_json::Value,
        context: String,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Timespan> {
        let r = Reader::open(value, "TimedRange", context, errors)?;
        let unit = parse_unit(&r, errors)?;
        let (low, high) = (r.number("low")?, r.number("high")?);
        if low > high {
            r.error(errors, format!("Low bound {} is above high bound {}", low, high));
            return None;
        }
        Some(Timespan {
            amount: Amount::Range { low, high },
            unit,
        })
    }

    /// Sample a duration and add it to `from`. `None` when the end falls
    /// outside the representable time range.
    pub fn end(&self, from: Time, rng: &mut RandomStream) -> Option<Time> {
        shift(from, self.amount.sample(rng), self.unit)
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

fn parse_unit(r: &Reader<'_>, errors: &mut Vec<ValidationError>) -> Option<TimeUnit> {
    let text = r.text("unit")?;
    match text.parse::<TimeUnit>() {
        Ok(unit) => Some(unit),
        Err(_) => {
            r.error(errors, format!("Unknown time unit '{}'", text));
            None
        }
    }
}

pub(crate) fn metadata() -> Vec<(&'static str, TypeMeta)> {
    let code = TypeMeta::new("Code")
        .field(FieldMeta::optional("system", FieldKind::Text))
        .field(FieldMeta::optional("code", FieldKind::Text))
        .field(FieldMeta::optional("display", FieldKind::Text))
        .requires(Requirement::all(&["code", "system", "display"]));

    let range = |unit_min: usize| {
        TypeMeta::new("Range")
            .field(FieldMeta::required("low", FieldKind::Number))
            .field(FieldMeta::required("high", FieldKind::Number))
            .field(FieldMeta {
                min: unit_min,
                ..FieldMeta::optional("unit", FieldKind::Text)
            })
    };
    let exact = |unit_min: usize| {
        TypeMeta::new("Exact")
            .field(FieldMeta::required("quantity", FieldKind::Number))
            .field(FieldMeta {
                min: unit_min,
                ..FieldMeta::optional("unit", FieldKind::Text)
            })
    };

    vec![
        ("Code", code),
        ("Range", range(0)),
        ("TimedRange", range(1)),
        ("Exact", exact(0)),
        ("TimedExact", exact(1)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reader(value: &serde_json::Value) -> (Reader<'_>, Vec<ValidationError>) {
        let mut errors = Vec::new();
        let (r, _) = Reader::open_polymorphic(value, "State", "type", "S", &mut errors).unwrap();
        (r, errors)
    }

    #[test]
    fn test_code_display() {
        let code = Code {
            system: "SNOMED-CT".into(),
            code: "74400008".into(),
            display: "Appendicitis".into(),
        };
        assert_eq!(code.to_string(), "SNOMED-CT[74400008]: Appendicitis");
    }

    #[test]
    fn test_timespan_exact() {
        let doc = json!({"type": "Delay", "exact": {"quantity": 3, "unit": "days"}});
        let (r, mut errors) = reader(&doc);
        let span = Timespan::parse(&r, &mut errors).unwrap();
        assert!(errors.is_empty());
        assert_eq!(span.amount, Amount::Exact(3.0));
        assert_eq!(span.unit, TimeUnit::Days);
    }

    #[test]
    fn test_timespan_requires_unit() {
        let doc = json!({"type": "Delay", "range": {"low": 1, "high": 2}});
        let (r, mut errors) = reader(&doc);
        assert!(Timespan::parse(&r, &mut errors).is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Required 'unit' is missing on Range 'S.range'");
    }

    #[test]
    fn test_inverted_range() {
        let doc = json!({"type": "Delay", "range": {"low": 5, "high": 1, "unit": "weeks"}});
        let (r, mut errors) = reader(&doc);
        assert!(Timespan::parse(&r, &mut errors).is_none());
        assert!(errors[0].message.contains("above high bound"));
    }

    #[test]
    fn test_range_sample_within_bounds() {
        let mut rng = RandomStream::from_seed(9);
        let amount = Amount::Range { low: 2.0, high: 4.0 };
        for _ in 0..100 {
            let v = amount.sample(&mut rng);
            assert!((2.0..=4.0).contains(&v));
        }
    }
}
