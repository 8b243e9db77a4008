//! The expectation an expression result is checked against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runtime::Type;

/// The three mutually exclusive states a result can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueMode {
    /// Known and not null.
    Specified,
    /// Not yet known.
    Unknown,
    /// A known null.
    Null,
}

impl ValueMode {
    pub const ALL: [ValueMode; 3] = [ValueMode::Specified, ValueMode::Unknown, ValueMode::Null];

    pub const fn as_str(self) -> &'static str {
        match self {
            ValueMode::Specified => "specified",
            ValueMode::Unknown => "unknown",
            ValueMode::Null => "null",
        }
    }

    /// Single-character tag, stable across releases.
    pub const fn tag(self) -> char {
        match self {
            ValueMode::Specified => 'C',
            ValueMode::Unknown => 'U',
            ValueMode::Null => 'N',
        }
    }

    /// The Rust path of this variant, for generated reproduction tests.
    pub const fn literal(self) -> &'static str {
        match self {
            ValueMode::Specified => "ValueMode::Specified",
            ValueMode::Unknown => "ValueMode::Unknown",
            ValueMode::Null => "ValueMode::Null",
        }
    }

    /// Classifies a value. Null wins over unknown.
    pub const fn derive(is_null: bool, is_known: bool) -> ValueMode {
        if is_null {
            ValueMode::Null
        } else if !is_known {
            ValueMode::Unknown
        } else {
            ValueMode::Specified
        }
    }
}

impl fmt::Display for ValueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value mode {0:?}; expected one of specified, unknown, null")]
pub struct ParseValueModeError(String);

impl FromStr for ValueMode {
    type Err = ParseValueModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "specified" | "c" => Ok(ValueMode::Specified),
            "unknown" | "u" => Ok(ValueMode::Unknown),
            "null" | "n" => Ok(ValueMode::Null),
            _ => Err(ParseValueModeError(s.to_string())),
        }
    }
}

/// What a correct result must look like.
///
/// `ty` is compared by exact equality, not convertibility. The wildcard type
/// belongs here only when the result will be unknown, null, or an empty
/// collection; this is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expected {
    pub ty: Type,
    pub mode: ValueMode,
    pub sensitive: bool,
}

impl Expected {
    pub fn new(ty: Type, mode: ValueMode, sensitive: bool) -> Self {
        Self {
            ty,
            mode,
            sensitive,
        }
    }

    pub fn specified(ty: Type) -> Self {
        Self::new(ty, ValueMode::Specified, false)
    }

    pub fn unknown(ty: Type) -> Self {
        Self::new(ty, ValueMode::Unknown, false)
    }

    pub fn null(ty: Type) -> Self {
        Self::new(ty, ValueMode::Null, false)
    }

    /// Requires the result to be marked sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Renders this expectation as a Rust constructor expression.
    pub fn literal(&self) -> String {
        format!(
            "Expected::new({}, {}, {})",
            self.ty.literal(),
            self.mode.literal(),
            self.sensitive
        )
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mode, self.ty)?;
        if self.sensitive {
            write!(f, " (sensitive)")?;
        }
        Ok(())
    }
}
