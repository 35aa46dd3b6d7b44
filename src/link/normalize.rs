// SPDX-License-Identifier: Apache-2.0

//! Type and identifier normalization
//!
//! Remote catalogs report types, precision and scale with vendor quirks
//! (Oracle reports DECIMAL precision 0 and scale -127, DATE precision 7).
//! Each quirk is a rule keyed by [`SqlType`]; identifier case handling is a
//! [`CasePolicy`] derived once from the remote's [`IdentifierCase`] flags.

use crate::engine::types::{IdentifierCase, SqlType, ValueKind};

/// Largest precision the host can represent for DECIMAL/NUMERIC.
pub const MAX_DECIMAL_PRECISION: i64 = 65_535;
/// Largest scale the host can represent for DECIMAL/NUMERIC.
pub const MAX_DECIMAL_SCALE: i32 = 32_767;
/// Display precision of `YYYY-MM-DD` minus separators.
pub const DATE_PRECISION: i64 = 8;
pub const TIME_PRECISION: i64 = 6;
pub const TIMESTAMP_PRECISION: i64 = 23;
pub const TIMESTAMP_TZ_PRECISION: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrecisionRule {
    Reported,
    /// A reported precision of 0 means "unbounded".
    ZeroIsMax,
    AtLeast(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleRule {
    Reported,
    /// A negative scale means "floating".
    NegativeIsMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypeRule {
    kind: ValueKind,
    precision: PrecisionRule,
    scale: ScaleRule,
}

const fn plain(kind: ValueKind) -> TypeRule {
    TypeRule {
        kind,
        precision: PrecisionRule::Reported,
        scale: ScaleRule::Reported,
    }
}

const fn decimal() -> TypeRule {
    TypeRule {
        kind: ValueKind::Decimal,
        precision: PrecisionRule::ZeroIsMax,
        scale: ScaleRule::NegativeIsMax,
    }
}

const fn temporal(kind: ValueKind, min_precision: i64) -> TypeRule {
    TypeRule {
        kind,
        precision: PrecisionRule::AtLeast(min_precision),
        scale: ScaleRule::Reported,
    }
}

const fn type_rule(sql_type: SqlType) -> TypeRule {
    match sql_type {
        SqlType::Null => plain(ValueKind::Null),
        SqlType::Bit | SqlType::Boolean => plain(ValueKind::Boolean),
        SqlType::TinyInt => plain(ValueKind::TinyInt),
        SqlType::SmallInt => plain(ValueKind::SmallInt),
        SqlType::Integer => plain(ValueKind::Int),
        SqlType::BigInt => plain(ValueKind::BigInt),
        SqlType::Real => plain(ValueKind::Real),
        SqlType::Float | SqlType::Double => plain(ValueKind::Double),
        SqlType::Numeric | SqlType::Decimal => decimal(),
        SqlType::Char | SqlType::NChar => plain(ValueKind::StringFixed),
        SqlType::VarChar | SqlType::NVarChar | SqlType::LongVarChar => plain(ValueKind::String),
        SqlType::Clob => plain(ValueKind::Clob),
        SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary => plain(ValueKind::Bytes),
        SqlType::Blob => plain(ValueKind::Blob),
        SqlType::Date => temporal(ValueKind::Date, DATE_PRECISION),
        SqlType::Time | SqlType::TimeWithTimezone => temporal(ValueKind::Time, TIME_PRECISION),
        SqlType::Timestamp => temporal(ValueKind::Timestamp, TIMESTAMP_PRECISION),
        SqlType::TimestampWithTimezone => {
            temporal(ValueKind::TimestampTz, TIMESTAMP_TZ_PRECISION)
        }
        SqlType::Uuid => plain(ValueKind::Uuid),
        SqlType::Json => plain(ValueKind::Json),
        SqlType::Array => plain(ValueKind::Array),
        SqlType::Other => plain(ValueKind::Other),
    }
}

/// Host view of a remote column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedType {
    pub kind: ValueKind,
    pub precision: i64,
    pub scale: i32,
}

/// Maps a remote (type, precision, scale) triple to the host's canonical form.
pub fn normalize_type(sql_type: SqlType, precision: i64, scale: i32) -> NormalizedType {
    let rule = type_rule(sql_type);
    let precision = match rule.precision {
        PrecisionRule::Reported => precision,
        PrecisionRule::ZeroIsMax if precision == 0 => MAX_DECIMAL_PRECISION,
        PrecisionRule::ZeroIsMax => precision,
        PrecisionRule::AtLeast(min) => precision.max(min),
    };
    let scale = match rule.scale {
        ScaleRule::NegativeIsMax if scale < 0 => MAX_DECIMAL_SCALE,
        ScaleRule::NegativeIsMax | ScaleRule::Reported => scale,
    };
    NormalizedType {
        kind: rule.kind,
        precision,
        scale,
    }
}

/// Display width derived from a precision, saturated to `i32`.
pub fn display_size(precision: i64) -> i32 {
    precision.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// How remote identifiers are folded to host case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CasePolicy {
    /// Remote stores upper case; names pass through.
    #[default]
    Preserve,
    /// Remote stores lower or mixed case: all-lower names become upper case.
    UpperIfAllLower,
    /// Remote compares case-insensitively even when it keeps mixed case
    /// (Teradata, SQL Server): every name becomes upper case.
    UpperAlways,
}

impl CasePolicy {
    pub fn from_case(case: &IdentifierCase) -> Self {
        if case.stores_mixed_case
            && (!case.supports_mixed_case || case.stores_mixed_case_quoted)
        {
            CasePolicy::UpperAlways
        } else if case.stores_mixed_case || case.stores_lower_case {
            CasePolicy::UpperIfAllLower
        } else {
            CasePolicy::Preserve
        }
    }

    pub fn fold(self, name: &str) -> String {
        match self {
            CasePolicy::Preserve => name.to_string(),
            CasePolicy::UpperIfAllLower if name == name.to_lowercase() => name.to_uppercase(),
            CasePolicy::UpperIfAllLower => name.to_string(),
            CasePolicy::UpperAlways => name.to_uppercase(),
        }
    }
}
