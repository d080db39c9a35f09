//! Carer availability diaries.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

/// A half-open availability period `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Event {
    begin: NaiveDateTime,
    end: NaiveDateTime,
}

impl Event {
    pub fn new(begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(begin <= end, "event must not end before it begins");
        Self { begin, end }
    }

    pub fn begin(&self) -> NaiveDateTime {
        self.begin
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.begin <= instant && instant < self.end
    }

    /// Pointwise intersection with another event, if non-empty.
    pub fn intersect(&self, other: &Event) -> Option<Event> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin < end {
            Some(Event::new(begin, end))
        } else {
            None
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// A carer's availability for one calendar date, as a set of disjoint events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diary {
    date: NaiveDate,
    events: Vec<Event>,
}

impl Diary {
    /// Create a diary. Events are sorted and overlapping or touching
    /// periods are coalesced, so the stored set is always disjoint.
    pub fn new(date: NaiveDate, mut events: Vec<Event>) -> Self {
        events.retain(|event| !event.is_empty());
        events.sort();

        let mut merged: Vec<Event> = Vec::with_capacity(events.len());
        for event in events {
            match merged.last_mut() {
                Some(last) if event.begin() <= last.end() => {
                    *last = Event::new(last.begin(), last.end().max(event.end()));
                }
                _ => merged.push(event),
            }
        }

        Self {
            date,
            events: merged,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total available time, summed over all events.
    pub fn duration(&self) -> Duration {
        self.events
            .iter()
            .fold(Duration::zero(), |acc, event| acc + event.duration())
    }

    /// Start of the first availability event.
    pub fn begin_time(&self) -> Option<NaiveDateTime> {
        self.events.first().map(Event::begin)
    }

    /// End of the last availability event.
    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.events.last().map(Event::end)
    }

    /// The idle gaps within `horizon`: the pre-shift gap, every gap between
    /// consecutive events and the post-shift gap. Empty gaps are skipped.
    pub fn breaks(&self, horizon: Event) -> Vec<Event> {
        let mut gaps = Vec::new();
        let mut cursor = horizon.begin();
        for event in &self.events {
            if cursor < event.begin() {
                gaps.push(Event::new(cursor, event.begin()));
            }
            cursor = cursor.max(event.end());
        }
        if cursor < horizon.end() {
            gaps.push(Event::new(cursor, horizon.end()));
        }
        gaps
    }

    /// Pointwise intersection of two diaries; used when forming carer teams.
    pub fn intersect(&self, other: &Diary) -> Diary {
        let mut events = Vec::new();
        for left in &self.events {
            for right in &other.events {
                if let Some(common) = left.intersect(right) {
                    events.push(common);
                }
            }
        }
        Diary::new(self.date, events)
    }

    /// True when `instant` lies within some event, tolerating `adjustment`
    /// of slack at the event boundaries.
    pub fn is_available(&self, instant: NaiveDateTime, adjustment: Duration) -> bool {
        self.events
            .iter()
            .any(|event| event.begin() - adjustment <= instant && instant < event.end() + adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        date().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn event(begin: (u32, u32), end: (u32, u32)) -> Event {
        Event::new(at(begin.0, begin.1), at(end.0, end.1))
    }

    #[test]
    fn test_events_sorted_and_merged() {
        let diary = Diary::new(
            date(),
            vec![event((13, 0), (17, 0)), event((8, 0), (12, 0)), event((12, 0), (13, 30))],
        );
        // The touching periods 8-12 and 12-13:30 merge, overlapping 13-17 extends.
        assert_eq!(diary.events(), &[event((8, 0), (17, 0))]);
    }

    #[test]
    fn test_duration_sums_events() {
        let diary = Diary::new(date(), vec![event((8, 0), (12, 0)), event((14, 0), (18, 0))]);
        assert_eq!(diary.duration(), Duration::hours(8));
    }

    #[test]
    fn test_breaks_cover_complement_of_events() {
        let diary = Diary::new(date(), vec![event((8, 0), (12, 0)), event((14, 0), (18, 0))]);
        let horizon = Event::new(at(0, 0), at(23, 0));

        let gaps = diary.breaks(horizon);
        assert_eq!(
            gaps,
            vec![
                event((0, 0), (8, 0)),
                event((12, 0), (14, 0)),
                event((18, 0), (23, 0)),
            ]
        );
    }

    #[test]
    fn test_breaks_skip_empty_boundary_gaps() {
        let diary = Diary::new(date(), vec![event((0, 0), (12, 0))]);
        let horizon = Event::new(at(0, 0), at(23, 0));
        assert_eq!(diary.breaks(horizon), vec![event((12, 0), (23, 0))]);
    }

    #[test]
    fn test_intersect() {
        let left = Diary::new(date(), vec![event((8, 0), (12, 0)), event((13, 0), (17, 0))]);
        let right = Diary::new(date(), vec![event((10, 0), (15, 0))]);

        let common = left.intersect(&right);
        assert_eq!(common.events(), &[event((10, 0), (12, 0)), event((13, 0), (15, 0))]);
    }

    #[test]
    fn test_event_contains_is_half_open() {
        let e = event((8, 0), (12, 0));
        assert!(e.contains(at(8, 0)));
        assert!(e.contains(at(11, 59)));
        assert!(!e.contains(at(12, 0)));
        assert!(!e.contains(at(7, 59)));
    }

    #[test]
    fn test_is_available_with_adjustment() {
        let diary = Diary::new(date(), vec![event((8, 0), (12, 0))]);

        assert!(diary.is_available(at(8, 0), Duration::zero()));
        assert!(diary.is_available(at(11, 59), Duration::zero()));
        assert!(!diary.is_available(at(12, 0), Duration::zero()));
        assert!(!diary.is_available(at(7, 45), Duration::zero()));

        assert!(diary.is_available(at(7, 45), Duration::minutes(15)));
        assert!(diary.is_available(at(12, 10), Duration::minutes(15)));
        assert!(!diary.is_available(at(12, 30), Duration::minutes(15)));
    }
}
