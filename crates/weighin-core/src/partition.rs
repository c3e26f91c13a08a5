//! Split a date range into calendar-month sub-ranges.
//!
//! The provider refuses range queries that cross a month boundary, so a
//! backfill is cut into one sub-range per month, each of which can be
//! fetched and reconciled on its own.

use time::{Date, Month};

use weighin_types::{DateRange, format_date};

use crate::error::{Error, Result};

/// Last day of the month containing `date`.
pub fn end_of_month(date: Date) -> Result<Date> {
    let (year, month) = (date.year(), date.month());
    let first_of_next = match month {
        Month::December => Date::from_calendar_date(year + 1, Month::January, 1),
        _ => Date::from_calendar_date(year, month.next(), 1),
    };
    first_of_next
        .ok()
        .and_then(|d| d.previous_day())
        .ok_or_else(|| out_of_bounds(date))
}

fn out_of_bounds(date: Date) -> Error {
    Error::InvalidRange {
        start: format_date(date),
        end: format_date(date),
    }
}

/// Partition `start..=end` into ordered, contiguous, month-aligned sub-ranges.
///
/// Fails unless `start` is strictly before `end`.
///
/// ```
/// use weighin_core::partition;
/// use time::macros::date;
///
/// let parts = partition(date!(2024 - 01 - 15), date!(2024 - 03 - 10))?;
/// let bounds: Vec<_> = parts.iter().map(|r| (r.start, r.end)).collect();
/// assert_eq!(bounds, vec![
///     (date!(2024 - 01 - 15), date!(2024 - 01 - 31)),
///     (date!(2024 - 02 - 01), date!(2024 - 02 - 29)),
///     (date!(2024 - 03 - 01), date!(2024 - 03 - 10)),
/// ]);
/// # Ok::<(), weighin_core::Error>(())
/// ```
pub fn partition(start: Date, end: Date) -> Result<Vec<DateRange>> {
    if start >= end {
        return Err(Error::InvalidRange {
            start: format_date(start),
            end: format_date(end),
        });
    }

    let mut ranges = Vec::new();
    let mut cursor = start;
    loop {
        let sub_end = end_of_month(cursor)?.min(end);
        ranges.push(DateRange {
            start: cursor,
            end: sub_end,
        });
        if sub_end >= end {
            break;
        }
        cursor = sub_end.next_day().ok_or_else(|| out_of_bounds(sub_end))?;
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_partition_leap_february() {
        let parts = partition(date!(2024 - 01 - 15), date!(2024 - 03 - 10)).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].end, date!(2024 - 02 - 29));
    }

    #[test]
    fn test_partition_within_one_month() {
        let parts = partition(date!(2023 - 02 - 01), date!(2023 - 02 - 28)).unwrap();
        assert_eq!(
            parts,
            vec![DateRange {
                start: date!(2023 - 02 - 01),
                end: date!(2023 - 02 - 28)
            }]
        );
    }

    #[test]
    fn test_partition_crosses_year() {
        let parts = partition(date!(2023 - 12 - 31), date!(2024 - 01 - 01)).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].start, parts[0].end);
        assert_eq!(parts[1].start, date!(2024 - 01 - 01));
    }

    #[test]
    fn test_partition_rejects_degenerate_and_inverted() {
        assert!(matches!(
            partition(date!(2024 - 01 - 15), date!(2024 - 01 - 15)),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            partition(date!(2024 - 03 - 10), date!(2024 - 01 - 15)),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_end_of_month() {
        assert_eq!(end_of_month(date!(2023 - 02 - 10)).unwrap(), date!(2023 - 02 - 28));
        assert_eq!(end_of_month(date!(2024 - 12 - 01)).unwrap(), date!(2024 - 12 - 31));
        assert_eq!(end_of_month(date!(2024 - 04 - 30)).unwrap(), date!(2024 - 04 - 30));
    }
}
