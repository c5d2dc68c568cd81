//! US federal holiday calendar computed from the observance rules

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Holiday names in calendar order
pub const US_FEDERAL_HOLIDAYS: [&str; 11] = [
    "New Year's Day",
    "Martin Luther King Jr. Day",
    "Washington's Birthday",
    "Memorial Day",
    "Juneteenth National Independence Day",
    "Independence Day",
    "Labor Day",
    "Columbus Day",
    "Veterans Day",
    "Thanksgiving",
    "Christmas Day",
];

/// Juneteenth became a federal holiday in 2021.
const JUNETEENTH_FIRST_YEAR: i32 = 2021;

/// Holidays falling in `year`, as `(date, name)` pairs.
pub fn holidays_for_year(year: i32) -> Vec<(NaiveDate, &'static str)> {
    let fixed = |month: u32, day: u32| NaiveDate::from_ymd_opt(year, month, day);

    let candidates = [
        (fixed(1, 1), US_FEDERAL_HOLIDAYS[0]),
        (nth_weekday(year, 1, Weekday::Mon, 3), US_FEDERAL_HOLIDAYS[1]),
        (nth_weekday(year, 2, Weekday::Mon, 3), US_FEDERAL_HOLIDAYS[2]),
        (last_weekday(year, 5, Weekday::Mon), US_FEDERAL_HOLIDAYS[3]),
        (
            if year >= JUNETEENTH_FIRST_YEAR {
                fixed(6, 19)
            } else {
                None
            },
            US_FEDERAL_HOLIDAYS[4],
        ),
        (fixed(7, 4), US_FEDERAL_HOLIDAYS[5]),
        (nth_weekday(year, 9, Weekday::Mon, 1), US_FEDERAL_HOLIDAYS[6]),
        (nth_weekday(year, 10, Weekday::Mon, 2), US_FEDERAL_HOLIDAYS[7]),
        (fixed(11, 11), US_FEDERAL_HOLIDAYS[8]),
        (nth_weekday(year, 11, Weekday::Thu, 4), US_FEDERAL_HOLIDAYS[9]),
        (fixed(12, 25), US_FEDERAL_HOLIDAYS[10]),
    ];

    candidates
        .into_iter()
        .filter_map(|(date, name)| date.map(|d| (d, name)))
        .collect()
}

/// Name of the holiday on `date`, if any.
pub fn holiday_on(date: NaiveDate) -> Option<&'static str> {
    holidays_for_year(date.year())
        .into_iter()
        .find(|(day, _)| *day == date)
        .map(|(_, name)| name)
}

/// The `n`-th (1-based) `weekday` of a month.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut day = first_of_next - Duration::days(1);
    while day.weekday() != weekday {
        day -= Duration::days(1);
    }
    Some(day)
}
