//! Holiday keywords and the dates a listing mentioning them may fall on.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::domain::{contains_phrase, normalize_text};

/// Inclusive month/day window. `start > end` wraps over the new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl DateWindow {
    pub const fn day(month: u32, day: u32) -> Self {
        Self { start: (month, day), end: (month, day) }
    }

    pub const fn month(month: u32) -> Self {
        Self { start: (month, 1), end: (month, 31) }
    }

    pub const fn range(start: (u32, u32), end: (u32, u32)) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        let md = (date.month(), date.day());
        if self.start <= self.end {
            self.start <= md && md <= self.end
        } else {
            md >= self.start || md <= self.end
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Holiday {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub window: DateWindow,
}

/// Moveable feasts get the range they can fall in over any year.
pub const HOLIDAYS: &[Holiday] = &[
    Holiday { name: "New Year's Day", keywords: &["new year's day", "new years day"], window: DateWindow::day(1, 1) },
    Holiday { name: "New Year's Eve", keywords: &["new year's eve", "new years eve"], window: DateWindow::day(12, 31) },
    Holiday { name: "New Year", keywords: &["new year", "new year's", "new years"], window: DateWindow::range((12, 26), (1, 15)) },
    Holiday { name: "Lunar New Year", keywords: &["lunar new year", "chinese new year"], window: DateWindow::range((1, 20), (2, 21)) },
    Holiday { name: "Valentine's Day", keywords: &["valentine", "valentine's", "valentines", "galentine's", "galentines"], window: DateWindow::range((2, 1), (2, 15)) },
    Holiday { name: "St. Patrick's Day", keywords: &["st. patrick's", "st patrick's", "st patricks", "saint patrick's", "st. paddy's"], window: DateWindow::range((3, 10), (3, 18)) },
    Holiday { name: "Easter", keywords: &["easter"], window: DateWindow::range((3, 20), (4, 26)) },
    Holiday { name: "Mother's Day", keywords: &["mother's day", "mothers day"], window: DateWindow::range((5, 1), (5, 14)) },
    Holiday { name: "Father's Day", keywords: &["father's day", "fathers day"], window: DateWindow::range((6, 10), (6, 21)) },
    Holiday { name: "Juneteenth", keywords: &["juneteenth"], window: DateWindow::day(6, 19) },
    Holiday { name: "Canada Day", keywords: &["canada day"], window: DateWindow::day(7, 1) },
    Holiday { name: "Independence Day", keywords: &["independence day", "fourth of july", "4th of july"], window: DateWindow::day(7, 4) },
    Holiday { name: "Halloween", keywords: &["halloween"], window: DateWindow::month(10) },
    Holiday { name: "Diwali", keywords: &["diwali"], window: DateWindow::range((10, 15), (11, 15)) },
    Holiday { name: "Remembrance Day", keywords: &["remembrance day", "veterans day", "veteran's day"], window: DateWindow::day(11, 11) },
    Holiday { name: "Thanksgiving", keywords: &["thanksgiving"], window: DateWindow::range((10, 1), (11, 30)) },
    Holiday { name: "Hanukkah", keywords: &["hanukkah", "chanukah"], window: DateWindow::range((11, 25), (1, 3)) },
    Holiday { name: "Christmas Eve", keywords: &["christmas eve"], window: DateWindow::day(12, 24) },
    Holiday { name: "Christmas", keywords: &["christmas", "xmas"], window: DateWindow::month(12) },
    Holiday { name: "Boxing Day", keywords: &["boxing day"], window: DateWindow::day(12, 26) },
];

/// The holiday a title refers to. The longest matching keyword wins, so
/// "Christmas Eve Candlelight Flow" resolves to Christmas Eve, not Christmas.
pub fn holiday_for_title(title: &str) -> Option<&'static Holiday> {
    let normalized = normalize_text(title).replace('\u{2019}', "'");
    HOLIDAYS
        .iter()
        .flat_map(|h| h.keywords.iter().map(move |kw| (h, *kw)))
        .filter(|(_, kw)| contains_phrase(&normalized, kw))
        .max_by_key(|(_, kw)| kw.len())
        .map(|(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_christmas_is_all_of_december() {
        let h = holiday_for_title("Christmas Market").unwrap();
        assert_eq!(h.name, "Christmas");
        assert!(h.window.contains(date(2026, 12, 5)));
        assert!(!h.window.contains(date(2026, 7, 4)));
    }

    #[test]
    fn test_canada_day_is_a_single_day() {
        let h = holiday_for_title("Canada Day Sunrise Yoga").unwrap();
        assert!(h.window.contains(date(2026, 7, 1)));
        assert!(!h.window.contains(date(2026, 7, 2)));
    }

    #[test]
    fn test_most_specific_keyword_wins() {
        assert_eq!(holiday_for_title("Christmas Eve Candlelight Flow").unwrap().name, "Christmas Eve");
        assert_eq!(holiday_for_title("New Year’s Eve Sound Bath").unwrap().name, "New Year's Eve");
    }

    #[test]
    fn test_window_wraps_year_end() {
        let h = holiday_for_title("New Year Intention Workshop").unwrap();
        assert!(h.window.contains(date(2026, 12, 30)));
        assert!(h.window.contains(date(2027, 1, 3)));
        assert!(!h.window.contains(date(2027, 3, 3)));
    }

    #[test]
    fn test_keywords_need_word_boundaries() {
        assert!(holiday_for_title("Sunrise Flow").is_none());
        assert!(holiday_for_title("Ashalloweeny Dance").is_none());
    }
}
