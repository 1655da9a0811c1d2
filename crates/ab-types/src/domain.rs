//! Parameter domains and the values a candidate assigns to them.
//!
//! A [`ParamDomain`] is the static definition a component declares; a
//! [`ParamValue`] is the current (possibly narrowed) assignment held by an
//! instance node. Numeric values are closed intervals, categorical values are
//! sets of category names. Both collapse to a single point once fully tuned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{CatalogError, DomainError};

/// Broad kind of a domain or value, used for compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Numeric,
    Categorical,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Categorical => write!(f, "categorical"),
        }
    }
}

/// Declared domain of a component parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamDomain {
    /// Closed interval [min, max], optionally restricted to integers.
    Numeric {
        min: f64,
        max: f64,
        #[serde(default)]
        integer: bool,
    },
    /// Finite set of category names.
    Categorical { values: Vec<String> },
}

impl ParamDomain {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Numeric { .. } => ValueKind::Numeric,
            Self::Categorical { .. } => ValueKind::Categorical,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Numeric { integer: true, .. })
    }

    /// The value an unset parameter implicitly holds: the whole domain.
    pub fn full_value(&self) -> ParamValue {
        match self {
            Self::Numeric { min, max, .. } => ParamValue::range(*min, *max),
            Self::Categorical { values } => ParamValue::categories(values.clone()),
        }
    }

    pub(crate) fn validate(&self, component: &str, parameter: &str) -> Result<(), CatalogError> {
        let invalid = |message: String| CatalogError::InvalidDomain {
            component: component.to_string(),
            parameter: parameter.to_string(),
            message,
        };
        match self {
            Self::Numeric { min, max, .. } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(invalid("bounds must be finite".into()));
                }
                if min > max {
                    return Err(invalid(format!("min {min} exceeds max {max}")));
                }
            }
            Self::Categorical { values } => {
                if values.is_empty() {
                    return Err(invalid("no categories declared".into()));
                }
            }
        }
        Ok(())
    }
}

/// Current assignment of a parameter on an instance node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Number(f64),
    Range { min: f64, max: f64 },
    Category(String),
    Categories(Vec<String>),
}

impl ParamValue {
    /// Interval value, collapsed to a point when `min == max`.
    pub fn range(min: f64, max: f64) -> Self {
        if min == max {
            Self::Number(min)
        } else {
            Self::Range { min, max }
        }
    }

    /// Category set, collapsed to a single category when only one remains.
    pub fn categories(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            Self::Category(values.remove(0))
        } else {
            Self::Categories(values)
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Number(_) | Self::Range { .. } => ValueKind::Numeric,
            Self::Category(_) | Self::Categories(_) => ValueKind::Categorical,
        }
    }

    /// True once the value admits exactly one concrete assignment.
    pub fn is_singleton(&self) -> bool {
        match self {
            Self::Number(_) | Self::Category(_) => true,
            Self::Range { min, max } => min == max,
            Self::Categories(values) => values.len() == 1,
        }
    }

    /// Numeric bounds, if this is a numeric value.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Number(x) => Some((*x, *x)),
            Self::Range { min, max } => Some((*min, *max)),
            _ => None,
        }
    }

    /// Remaining category names, if this is a categorical value.
    pub fn category_set(&self) -> Option<Vec<&str>> {
        match self {
            Self::Category(c) => Some(vec![c.as_str()]),
            Self::Categories(values) => Some(values.iter().map(String::as_str).collect()),
            _ => None,
        }
    }

    fn mismatch(&self, other: &ParamValue) -> DomainError {
        DomainError::KindMismatch {
            left: format!("{} {}", self.kind(), self),
            right: format!("{} {}", other.kind(), other),
        }
    }

    /// Whether every assignment admitted by `other` is also admitted by `self`.
    pub fn subsumes(&self, other: &ParamValue) -> Result<bool, DomainError> {
        if let (Some((a, b)), Some((c, d))) = (self.bounds(), other.bounds()) {
            return Ok(a <= c && d <= b);
        }
        match (self.category_set(), other.category_set()) {
            (Some(outer), Some(inner)) => Ok(inner.iter().all(|c| outer.contains(c))),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Whether `self` and `other` admit at least one common assignment.
    pub fn overlaps(&self, other: &ParamValue) -> Result<bool, DomainError> {
        Ok(self.intersect(other)?.is_some())
    }

    /// Intersection of two values of the same kind; `None` when empty.
    pub fn intersect(&self, other: &ParamValue) -> Result<Option<ParamValue>, DomainError> {
        if let (Some((a, b)), Some((c, d))) = (self.bounds(), other.bounds()) {
            let (lo, hi) = (a.max(c), b.min(d));
            return Ok((lo <= hi).then(|| ParamValue::range(lo, hi)));
        }
        match (self.category_set(), other.category_set()) {
            (Some(left), Some(right)) => {
                let common: Vec<String> = left
                    .into_iter()
                    .filter(|c| right.contains(c))
                    .map(str::to_string)
                    .collect();
                Ok((!common.is_empty()).then(|| ParamValue::categories(common)))
            }
            _ => Err(self.mismatch(other)),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(x) => write!(f, "{x}"),
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::Category(c) => write!(f, "{c}"),
            Self::Categories(values) => write!(f, "{{{}}}", values.join(",")),
        }
    }
}

impl FromStr for ParamValue {
    type Err = DomainError;

    /// Parses `3`, `[0, 10]`, `svm` and `{svm,tree}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let parse_err = || DomainError::Parse {
            input: s.to_string(),
        };
        if input.is_empty() {
            return Err(parse_err());
        }
        if let Some(inner) = input.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let mut parts = inner.split(',').map(str::trim);
            let (Some(lo), Some(hi), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(parse_err());
            };
            let min: f64 = lo.parse().map_err(|_| parse_err())?;
            let max: f64 = hi.parse().map_err(|_| parse_err())?;
            if min > max {
                return Err(parse_err());
            }
            return Ok(ParamValue::range(min, max));
        }
        if let Some(inner) = input.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let values: Vec<String> = inner
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(parse_err());
            }
            return Ok(ParamValue::categories(values));
        }
        match input.parse::<f64>() {
            Ok(x) => Ok(ParamValue::Number(x)),
            Err(_) => Ok(ParamValue::Category(input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(values: &[&str]) -> ParamValue {
        ParamValue::categories(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn full_value_covers_domain() {
        let numeric = ParamDomain::Numeric {
            min: 0.0,
            max: 10.0,
            integer: false,
        };
        assert_eq!(numeric.full_value(), ParamValue::Range { min: 0.0, max: 10.0 });

        let single = ParamDomain::Categorical {
            values: vec!["svm".into()],
        };
        assert_eq!(single.full_value(), ParamValue::Category("svm".into()));
        assert!(single.full_value().is_singleton());
    }

    #[test]
    fn numeric_intersection() {
        let a = ParamValue::range(0.0, 10.0);
        let b = ParamValue::range(5.0, 20.0);
        assert_eq!(a.intersect(&b).unwrap(), Some(ParamValue::range(5.0, 10.0)));

        let disjoint = ParamValue::range(11.0, 12.0);
        assert_eq!(a.intersect(&disjoint).unwrap(), None);

        let touching = ParamValue::range(10.0, 12.0);
        assert_eq!(a.intersect(&touching).unwrap(), Some(ParamValue::Number(10.0)));
    }

    #[test]
    fn categorical_intersection_keeps_left_order() {
        let a = cats(&["c", "b", "a"]);
        let b = cats(&["a", "c"]);
        assert_eq!(a.intersect(&b).unwrap(), Some(cats(&["c", "a"])));
        assert_eq!(a.intersect(&cats(&["z", "y"])).unwrap(), None);
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let numeric = ParamValue::Number(1.0);
        let categorical = ParamValue::Category("rbf".into());
        assert!(matches!(
            numeric.intersect(&categorical),
            Err(DomainError::KindMismatch { .. })
        ));
        assert!(numeric.subsumes(&categorical).is_err());
    }

    #[test]
    fn subsumption() {
        let wide = ParamValue::range(0.0, 10.0);
        assert!(wide.subsumes(&ParamValue::Number(3.0)).unwrap());
        assert!(!wide.subsumes(&ParamValue::range(5.0, 11.0)).unwrap());
        assert!(cats(&["a", "b"]).subsumes(&ParamValue::Category("a".into())).unwrap());
        assert!(!ParamValue::Category("a".into()).subsumes(&cats(&["a", "b"])).unwrap());
        assert!(wide.overlaps(&ParamValue::range(9.0, 12.0)).unwrap());
    }

    #[test]
    fn textual_encoding() {
        assert_eq!("3".parse::<ParamValue>().unwrap(), ParamValue::Number(3.0));
        assert_eq!(
            "[0, 10]".parse::<ParamValue>().unwrap(),
            ParamValue::Range { min: 0.0, max: 10.0 }
        );
        assert_eq!("[4,4]".parse::<ParamValue>().unwrap(), ParamValue::Number(4.0));
        assert_eq!("svm".parse::<ParamValue>().unwrap(), ParamValue::Category("svm".into()));
        assert_eq!("{svm, tree}".parse::<ParamValue>().unwrap(), cats(&["svm", "tree"]));
        assert!("[5, 1]".parse::<ParamValue>().is_err());
        assert!("[1, 2, 3]".parse::<ParamValue>().is_err());

        assert_eq!(ParamValue::range(0.0, 2.5).to_string(), "[0, 2.5]");
        assert_eq!(cats(&["a", "b"]).to_string(), "{a,b}");
    }

    #[test]
    fn invalid_domains_rejected() {
        let inverted = ParamDomain::Numeric {
            min: 3.0,
            max: 1.0,
            integer: true,
        };
        assert!(inverted.validate("svm", "c").is_err());
        let empty = ParamDomain::Categorical { values: vec![] };
        assert!(empty.validate("svm", "kernel").is_err());
    }
}
