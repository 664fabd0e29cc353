// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Human readable byte sizes used by dump policy parameters.
//!
//! Accepted forms are a non-negative number followed by an optional unit:
//! `"2B"`, `"512 KiB"`, `"1.5GB"`. SI units (`KB`, `MB`, ...) are powers of
//! 1000, IEC units (`KiB`, `MiB`, ...) are powers of 1024. Units are case
//! insensitive and a missing unit means bytes.

use std::fmt;
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

const IEC_UNITS: [(u64, &str); 4] = [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")];

/// Errors raised while parsing a byte size
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ByteSizeError {
    #[error("empty size")]
    Empty,
    #[error("negative size: {0}")]
    Negative(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
    #[error("size overflows 64 bits: {0}")]
    Overflow(String),
}

/// A size in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Format using the largest IEC unit that keeps the value above one
    pub fn human_readable(self) -> String {
        for (factor, unit) in IEC_UNITS {
            if self.0 >= factor {
                if self.0 % factor == 0 {
                    return format!("{} {}", self.0 / factor, unit);
                }
                let value = self.0 as f64 / factor as f64;
                let formatted = format!("{value:.2}");
                let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
                return format!("{formatted} {unit}");
            }
        }
        format!("{} B", self.0)
    }
}

fn unit_factor(unit: &str) -> Option<u64> {
    let factor = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" | "k" => 1_000,
        "mb" | "m" => 1_000_000,
        "gb" | "g" => 1_000_000_000,
        "tb" | "t" => 1_000_000_000_000,
        "kib" => KIB,
        "mib" => MIB,
        "gib" => GIB,
        "tib" => TIB,
        _ => return None,
    };
    Some(factor)
}

impl FromStr for ByteSize {
    type Err = ByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(ByteSizeError::Empty);
        }
        if input.starts_with('-') {
            return Err(ByteSizeError::Negative(input.to_string()));
        }

        let split = input.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(input.len());
        let (number, unit) = input.split_at(split);
        if number.is_empty() {
            return Err(ByteSizeError::InvalidNumber(input.to_string()));
        }

        let factor = unit_factor(unit.trim()).ok_or_else(|| ByteSizeError::UnknownUnit(unit.trim().to_string()))?;

        if let Ok(whole) = number.parse::<u64>() {
            return whole.checked_mul(factor).map(ByteSize).ok_or_else(|| ByteSizeError::Overflow(input.to_string()));
        }

        let value: f64 = number.parse().map_err(|_| ByteSizeError::InvalidNumber(number.to_string()))?;
        let bytes = value * factor as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(ByteSizeError::Overflow(input.to_string()));
        }
        Ok(ByteSize(bytes as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_readable())
    }
}
