use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, VmOpsError};

pub const KIB: u128 = 1024;
pub const MIB: u128 = 1024 * KIB;
pub const GIB: u128 = 1024 * MIB;

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 6] = ["k", "M", "G", "T", "P", "E"];

/// Which suffix family a quantity prints with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityFormat {
    BinarySi,
    DecimalSi,
}

/// An exact storage size in bytes, in Kubernetes quantity notation.
///
/// Values are whole bytes; fractional inputs (`1.5`, `100m`) round up so a
/// parsed size is never smaller than what was written.
#[derive(Debug, Clone, Copy, Eq)]
pub struct CapacityQuantity {
    bytes: u128,
    format: QuantityFormat,
}

impl CapacityQuantity {
    pub const fn from_bytes(bytes: u128, format: QuantityFormat) -> Self {
        Self { bytes, format }
    }

    pub const fn zero(format: QuantityFormat) -> Self {
        Self::from_bytes(0, format)
    }

    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Add another quantity, keeping this quantity's format.
    pub fn checked_add(&self, other: &CapacityQuantity) -> Option<CapacityQuantity> {
        Some(Self::from_bytes(self.bytes.checked_add(other.bytes)?, self.format))
    }

    /// Round up to a multiple of `unit`. Anything below one unit becomes one unit.
    pub fn round_up_to(&self, unit: u128) -> Option<CapacityQuantity> {
        if unit == 0 {
            return Some(*self);
        }
        let units = self.bytes.div_ceil(unit).max(1);
        Some(Self::from_bytes(units.checked_mul(unit)?, self.format))
    }
}

impl PartialEq for CapacityQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

// Equality ignores the display format, so hashing must too.
impl Hash for CapacityQuantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for CapacityQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapacityQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for CapacityQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (base, suffixes) = match self.format {
            QuantityFormat::BinarySi => (1024u128, BINARY_SUFFIXES),
            QuantityFormat::DecimalSi => (1000u128, DECIMAL_SUFFIXES),
        };
        if self.bytes == 0 {
            return write!(f, "0");
        }
        let mut value = self.bytes;
        let mut exponent = 0usize;
        while exponent < suffixes.len() && value % base == 0 {
            value /= base;
            exponent += 1;
        }
        match exponent {
            0 => write!(f, "{value}"),
            n => write!(f, "{value}{}", suffixes[n - 1]),
        }
    }
}

/// Multiplier expressed as an exact fraction.
struct Scale {
    numerator: u128,
    denominator: u128,
    format: QuantityFormat,
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let whole = |numerator, format| Scale {
        numerator,
        denominator: 1,
        format,
    };
    if suffix.is_empty() {
        return Some(whole(1, QuantityFormat::DecimalSi));
    }
    if let Some(pos) = BINARY_SUFFIXES.iter().position(|s| *s == suffix) {
        return Some(whole(1024u128.pow(pos as u32 + 1), QuantityFormat::BinarySi));
    }
    if let Some(pos) = DECIMAL_SUFFIXES.iter().position(|s| *s == suffix) {
        return Some(whole(1000u128.pow(pos as u32 + 1), QuantityFormat::DecimalSi));
    }
    if suffix == "m" {
        return Some(Scale {
            numerator: 1,
            denominator: 1000,
            format: QuantityFormat::DecimalSi,
        });
    }
    // Decimal exponent: e3, E-2
    let exp = suffix.strip_prefix(['e', 'E'])?;
    let exp: i32 = exp.parse().ok()?;
    let magnitude = 10u128.checked_pow(exp.unsigned_abs())?;
    Some(if exp >= 0 {
        whole(magnitude, QuantityFormat::DecimalSi)
    } else {
        Scale {
            numerator: 1,
            denominator: magnitude,
            format: QuantityFormat::DecimalSi,
        }
    })
}

impl FromStr for CapacityQuantity {
    type Err = VmOpsError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |detail: &str| VmOpsError::InvalidQuantity {
            value: s.to_string(),
            detail: detail.to_string(),
        };

        let trimmed = s.trim();
        if trimmed.starts_with('-') {
            return Err(invalid("quantity must not be negative"));
        }
        let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("missing numeric value"));
        }
        if frac_part.contains('.') {
            return Err(invalid("more than one decimal point"));
        }

        let too_large = || invalid("value out of range");
        let digits = format!("{int_part}{frac_part}");
        let mantissa: u128 = digits.parse().map_err(|_| too_large())?;
        let frac_scale = 10u128
            .checked_pow(frac_part.len() as u32)
            .ok_or_else(too_large)?;

        let scale = parse_suffix(suffix).ok_or_else(|| invalid("unknown suffix"))?;

        let numerator = mantissa
            .checked_mul(scale.numerator)
            .ok_or_else(too_large)?;
        let denominator = frac_scale
            .checked_mul(scale.denominator)
            .ok_or_else(too_large)?;

        Ok(Self::from_bytes(
            numerator.div_ceil(denominator),
            scale.format,
        ))
    }
}

impl Serialize for CapacityQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CapacityQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = CapacityQuantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a Kubernetes quantity string or a non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(CapacityQuantity::from_bytes(
                    v as u128,
                    QuantityFormat::DecimalSi,
                ))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom("quantity must not be negative"))
                    .and_then(|v| self.visit_u64(v))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

impl From<CapacityQuantity> for k8s_openapi::apimachinery::pkg::api::resource::Quantity {
    fn from(q: CapacityQuantity) -> Self {
        Self(q.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> CapacityQuantity {
        s.parse().unwrap()
    }

    #[test]
    fn equal_sizes_in_different_notation_hash_alike() {
        use std::collections::HashSet;

        let binary = q("1Gi");
        let plain = q("1073741824");
        assert_eq!(binary, plain);
        assert_ne!(binary.format(), plain.format());
        assert_eq!(HashSet::from([binary, plain]).len(), 1);
    }

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(q("1Gi").bytes(), GIB);
        assert_eq!(q("1Gi").format(), QuantityFormat::BinarySi);
        assert_eq!(q("512Mi").bytes(), 512 * MIB);
        assert_eq!(q("2G").bytes(), 2_000_000_000);
        assert_eq!(q("2G").format(), QuantityFormat::DecimalSi);
        assert_eq!(q("1536").bytes(), 1536);
        assert_eq!(q("1e3").bytes(), 1000);
        assert_eq!(q("1E").bytes(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn fractions_round_up_to_whole_bytes() {
        assert_eq!(q("1.5Ki").bytes(), 1536);
        assert_eq!(q("0.1").bytes(), 1);
        assert_eq!(q("1500m").bytes(), 2);
        assert_eq!(q("1.0000001Gi").bytes(), GIB + 108);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<CapacityQuantity>().is_err());
        assert!("-1Gi".parse::<CapacityQuantity>().is_err());
        assert!("12Qi".parse::<CapacityQuantity>().is_err());
        assert!("1.2.3".parse::<CapacityQuantity>().is_err());
        assert!("Gi".parse::<CapacityQuantity>().is_err());
    }

    #[test]
    fn canonical_display() {
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1.5Gi").to_string(), "1536Mi");
        assert_eq!(q("1000k").to_string(), "1M");
        assert_eq!(q("0Gi").to_string(), "0");
        assert_eq!(
            CapacityQuantity::from_bytes(1_133_510_656, QuantityFormat::BinarySi).to_string(),
            "1081Mi"
        );
        assert_eq!(
            CapacityQuantity::from_bytes(1_132_786_238, QuantityFormat::BinarySi).to_string(),
            "1132786238"
        );
    }

    #[test]
    fn round_up_never_shrinks() {
        let small = CapacityQuantity::from_bytes(10, QuantityFormat::BinarySi);
        assert_eq!(small.round_up_to(MIB).unwrap().bytes(), MIB);
        assert_eq!(q("3Mi").round_up_to(MIB).unwrap(), q("3Mi"));
        assert_eq!(q("3Mi").checked_add(&q("1")).unwrap().round_up_to(MIB).unwrap(), q("4Mi"));
    }

    #[test]
    fn serde_uses_strings() {
        let json = serde_json::to_string(&q("100Mi")).unwrap();
        assert_eq!(json, "\"100Mi\"");
        let back: CapacityQuantity = serde_json::from_str("\"2Gi\"").unwrap();
        assert_eq!(back, q("2Gi"));
        let number: CapacityQuantity = serde_json::from_str("4096").unwrap();
        assert_eq!(number.bytes(), 4096);
    }
}
