use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, VmOpsError};
use crate::quantity::{CapacityQuantity, MIB};

/// Overhead used when the cluster carries no CDI config at all.
pub const DEFAULT_FS_OVERHEAD: OverheadFraction = OverheadFraction {
    scaled: 55,
    scale: 3,
};

pub const FS_OVERHEAD_NOTICE: &str = "Unable to determine FS overhead, using default";

/// Name of the cluster-scoped CDI config resource.
pub const CDI_CONFIG_NAME: &str = "config";

/// How the claim's volume will be exposed to the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeMode {
    #[default]
    Filesystem,
    Block,
}

/// An exact decimal fraction between 0 and 1, such as `0.055`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverheadFraction {
    scaled: u128,
    scale: u32,
}

impl OverheadFraction {
    pub const ZERO: OverheadFraction = OverheadFraction {
        scaled: 0,
        scale: 0,
    };

    fn denominator(&self) -> u128 {
        10u128.pow(self.scale)
    }
}

impl FromStr for OverheadFraction {
    type Err = VmOpsError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |detail: &str| VmOpsError::InvalidOverhead {
            value: s.to_string(),
            detail: detail.to_string(),
        };
        let trimmed = s.trim();
        let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid("expected a decimal number"));
        }
        let frac_part = frac_part.trim_end_matches('0');
        // More than 30 fractional digits cannot fit the exact representation.
        if frac_part.len() > 30 {
            return Err(invalid("too many decimal places"));
        }
        let scale = frac_part.len() as u32;
        let scaled: u128 = format!("{int_part}{frac_part}")
            .parse()
            .map_err(|_| invalid("value out of range"))?;
        let fraction = OverheadFraction { scaled, scale };
        if fraction.scaled > fraction.denominator() {
            return Err(invalid("overhead must be between 0 and 1"));
        }
        Ok(fraction)
    }
}

impl fmt::Display for OverheadFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.scaled);
        }
        let den = self.denominator();
        write!(
            f,
            "{}.{:0width$}",
            self.scaled / den,
            self.scaled % den,
            width = self.scale as usize
        )
    }
}

impl Serialize for OverheadFraction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OverheadFraction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Filesystem overhead as published in the CDI config status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemOverhead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<OverheadFraction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage_class: BTreeMap<String, OverheadFraction>,
}

impl FilesystemOverhead {
    /// Pick the overhead that applies to a claim.
    ///
    /// Block volumes carry no filesystem and get zero. Otherwise a
    /// storage-class entry wins over the global value; `None` means the
    /// cluster default class, which always uses the global value. A
    /// filesystem claim with neither is an error, never zero.
    pub fn select(
        &self,
        storage_class: Option<&str>,
        volume_mode: VolumeMode,
    ) -> Result<OverheadFraction> {
        if volume_mode == VolumeMode::Block {
            return Ok(OverheadFraction::ZERO);
        }
        storage_class
            .and_then(|class| self.storage_class.get(class))
            .copied()
            .or(self.global)
            .ok_or(VmOpsError::MissingGlobalOverhead)
    }
}

/// Grow `size` by `overhead` and round up to a whole MiB.
///
/// The multiplication is exact; the only rounding is upward, once to whole
/// bytes and once to the MiB boundary.
pub fn size_with_overhead(
    size: &CapacityQuantity,
    overhead: OverheadFraction,
) -> Result<CapacityQuantity> {
    let overflow = || VmOpsError::InvalidQuantity {
        value: size.to_string(),
        detail: format!("size with {overhead} overhead is out of range"),
    };
    let den = overhead.denominator();
    let grown = size
        .bytes()
        .checked_mul(den + overhead.scaled)
        .ok_or_else(overflow)?
        .div_ceil(den);
    CapacityQuantity::from_bytes(grown, size.format())
        .round_up_to(MIB)
        .ok_or_else(overflow)
}
