//! Date search parameter implementation.
//!
//! A search value becomes a half-open interval `[start, end)`:
//! - `2020` covers the whole year, `2020-03` the month, `2020-03-15` the day
//! - `2020-03-15T10:30` covers the minute
//! - a full instant `t` covers `[t, t + 1µs)`, the smallest stored increment
//!
//! Stored values are either points (`DATE_VALUE`) or periods (`DATE_START`,
//! `DATE_END` with an inclusive end). For every prefix the point relation and
//! the period relation are OR-ed:
//!
//! | prefix | point                         | period                                  |
//! |--------|-------------------------------|-----------------------------------------|
//! | eq     | `v >= start AND v < end`      | `START >= start AND END <= end_incl`    |
//! | ne     | `v < start OR v >= end`       | `START < start OR END > end_incl`       |
//! | gt, sa | `v > start`                   | `START > start`                         |
//! | lt, eb | `v < end_incl`                | `END < end_incl`                        |
//! | ge     | `v >= start`                  | `END >= start`                          |
//! | le     | `v <= end_incl`               | `START <= end_incl`                     |
//! | ap     | `v >= start AND v <= end_incl`| contained, or overlapping either bound  |

use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use super::{PredicateContext, name_segment};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::SearchPrefix;
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{DATE_END, DATE_START, DATE_VALUE};

/// Half-open search interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: OffsetDateTime,
    /// Exclusive.
    pub end: OffsetDateTime,
}

impl DateRange {
    /// Inclusive upper bound, for columns that store inclusive ends.
    pub fn end_inclusive(&self) -> OffsetDateTime {
        self.end - Duration::microseconds(1)
    }
}

/// Expand a FHIR date or dateTime search value into its interval.
///
/// Values without a timezone are taken as UTC.
pub fn parse_date_range(raw: &str) -> Result<DateRange, String> {
    let trimmed = raw.trim();

    // Year only: 2020
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = trimmed.parse().map_err(|_| format!("Invalid year: {trimmed}"))?;
        let start = calendar_date(year, Month::January, 1)?;
        let end = calendar_date(year + 1, Month::January, 1)?;
        return Ok(DateRange {
            start: midnight(start),
            end: midnight(end),
        });
    }

    // Year-Month: 2020-03
    if trimmed.len() == 7 && trimmed.as_bytes().get(4) == Some(&b'-') {
        let (year, month) = trimmed.split_at(4);
        let year: i32 = year.parse().map_err(|_| format!("Invalid year: {year}"))?;
        let month_num: u8 = month[1..]
            .parse()
            .map_err(|_| format!("Invalid month: {}", &month[1..]))?;
        let month =
            Month::try_from(month_num).map_err(|_| format!("Invalid month number: {month_num}"))?;

        let start = calendar_date(year, month, 1)?;
        let end = if month == Month::December {
            calendar_date(year + 1, Month::January, 1)?
        } else {
            calendar_date(year, month.next(), 1)?
        };
        return Ok(DateRange {
            start: midnight(start),
            end: midnight(end),
        });
    }

    // Full date: 2020-03-15
    if trimmed.len() == 10 && !trimmed.contains('T') {
        let date = Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
            .map_err(|e| format!("Invalid date: {e}"))?;
        let next = date
            .next_day()
            .ok_or_else(|| format!("Date out of range: {trimmed}"))?;
        return Ok(DateRange {
            start: midnight(date),
            end: midnight(next),
        });
    }

    parse_datetime_range(trimmed)
}

fn parse_datetime_range(raw: &str) -> Result<DateRange, String> {
    if let Ok(instant) = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339) {
        let utc = instant
            .checked_to_offset(UtcOffset::UTC)
            .ok_or_else(|| format!("Datetime out of range: {raw}"))?;
        return instant_range(utc);
    }

    // Minute precision, no timezone: 2020-03-15T10:30
    if raw.len() == 16 {
        let start = PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        )
        .map_err(|e| format!("Invalid datetime: {e}"))?
        .assume_utc();
        let end = start
            .checked_add(Duration::minutes(1))
            .ok_or_else(|| format!("Datetime out of range: {raw}"))?;
        return Ok(DateRange { start, end });
    }

    // Full precision, no timezone
    let local = PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        )
    })
    .map_err(|e| format!("Invalid datetime: {e}"))?;
    instant_range(local.assume_utc())
}

/// `[t, t + 1µs)`, with `t` already in UTC.
fn instant_range(instant: OffsetDateTime) -> Result<DateRange, String> {
    let end = instant
        .checked_add(Duration::microseconds(1))
        .ok_or_else(|| format!("Datetime out of range: {instant}"))?;
    Ok(DateRange { start: instant, end })
}

fn calendar_date(year: i32, month: Month, day: u8) -> Result<Date, String> {
    Date::from_calendar_date(year, month, day).map_err(|e| format!("Invalid date: {e}"))
}

fn midnight(date: Date) -> OffsetDateTime {
    date.with_time(Time::MIDNIGHT).assume_utc()
}

fn ts(value: OffsetDateTime) -> SqlValue {
    SqlValue::Timestamp(value)
}

fn compare(fragment: &mut Fragment, alias: &AliasRef, column: &str, op: &str, value: OffsetDateTime) {
    fragment
        .push_column_of(alias.clone(), column)
        .push_sql(format!(" {op} "))
        .push_bind(ts(value));
}

/// `(<a> <op_a> ? <joiner> <b> <op_b> ?)`
fn pair(
    alias: &AliasRef,
    first: (&str, &str, OffsetDateTime),
    joiner: &str,
    second: (&str, &str, OffsetDateTime),
) -> Fragment {
    let mut fragment = Fragment::sql("(");
    compare(&mut fragment, alias, first.0, first.1, first.2);
    fragment.push_sql(joiner);
    compare(&mut fragment, alias, second.0, second.1, second.2);
    fragment.push_sql(")");
    fragment
}

fn single(alias: &AliasRef, column: &str, op: &str, value: OffsetDateTime) -> Fragment {
    let mut fragment = Fragment::new();
    compare(&mut fragment, alias, column, op, value);
    fragment
}

/// Relation between a stored point in `column` and the search interval.
pub fn point_relation(
    alias: &AliasRef,
    column: &str,
    prefix: SearchPrefix,
    range: &DateRange,
) -> Fragment {
    let (start, end, end_incl) = (range.start, range.end, range.end_inclusive());
    match prefix {
        SearchPrefix::Eq => pair(alias, (column, ">=", start), " AND ", (column, "<", end)),
        SearchPrefix::Ne => pair(alias, (column, "<", start), " OR ", (column, ">=", end)),
        SearchPrefix::Gt | SearchPrefix::Sa => single(alias, column, ">", start),
        SearchPrefix::Lt | SearchPrefix::Eb => single(alias, column, "<", end_incl),
        SearchPrefix::Ge => single(alias, column, ">=", start),
        SearchPrefix::Le => single(alias, column, "<=", end_incl),
        SearchPrefix::Ap => pair(alias, (column, ">=", start), " AND ", (column, "<=", end_incl)),
    }
}

/// Relation between a stored period and the search interval.
fn period_relation(alias: &AliasRef, prefix: SearchPrefix, range: &DateRange) -> Fragment {
    let (start, end_incl) = (range.start, range.end_inclusive());
    match prefix {
        SearchPrefix::Eq => pair(
            alias,
            (DATE_START, ">=", start),
            " AND ",
            (DATE_END, "<=", end_incl),
        ),
        SearchPrefix::Ne => pair(
            alias,
            (DATE_START, "<", start),
            " OR ",
            (DATE_END, ">", end_incl),
        ),
        SearchPrefix::Gt | SearchPrefix::Sa => single(alias, DATE_START, ">", start),
        SearchPrefix::Lt | SearchPrefix::Eb => single(alias, DATE_END, "<", end_incl),
        SearchPrefix::Ge => single(alias, DATE_END, ">=", start),
        SearchPrefix::Le => single(alias, DATE_START, "<=", end_incl),
        SearchPrefix::Ap => Fragment::join(
            [
                // contained
                pair(alias, (DATE_START, ">=", start), " AND ", (DATE_END, "<=", end_incl)),
                // overlaps the start
                pair(alias, (DATE_START, "<=", start), " AND ", (DATE_END, ">=", start)),
                // overlaps the end
                pair(alias, (DATE_START, "<=", end_incl), " AND ", (DATE_END, ">=", end_incl)),
            ],
            " OR ",
        ),
    }
}

/// Parse a date value of `param`, mapping failures to a malformed-parameter error.
pub(crate) fn range_of(param: &QueryParameter, value: &ParameterValue) -> Result<DateRange, QueryBuilderError> {
    match value {
        ParameterValue::Date(raw) | ParameterValue::String(raw) => {
            parse_date_range(raw).map_err(|message| QueryBuilderError::malformed(&param.code, message))
        }
        other => Err(QueryBuilderError::malformed(
            &param.code,
            format!("expected a date, got {}", other.kind_name()),
        )),
    }
}

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        let range = range_of(param, &value.value)?;
        let prefix = value.effective_prefix();
        clauses.push(
            Fragment::join(
                [
                    point_relation(&AliasRef::Param, DATE_VALUE, prefix, &range),
                    period_relation(&AliasRef::Param, prefix, &range),
                ],
                " OR ",
            )
            .parenthesized(),
        );
    }

    Ok(name_segment(name_id, clauses))
}
