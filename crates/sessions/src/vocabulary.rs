//! Event names that open and close a level session.

use std::collections::HashSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventClass {
    Start,
    Win,
    Fail,
    /// Anything else (purchases, booster usage, ...). Still contributes cost.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventVocabulary {
    start: HashSet<String>,
    win: HashSet<String>,
    fail: HashSet<String>,
}

pub const DEFAULT_START_EVENTS: [&str; 3] = ["missionStart", "level_start", "start"];
pub const DEFAULT_WIN_EVENTS: [&str; 3] = ["missionComplete", "level_win", "win"];
pub const DEFAULT_FAIL_EVENTS: [&str; 3] = ["missionFail", "level_fail", "fail"];

impl Default for EventVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_START_EVENTS, DEFAULT_WIN_EVENTS, DEFAULT_FAIL_EVENTS)
    }
}

impl EventVocabulary {
    pub fn new<S, W, F>(start: S, win: W, fail: F) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            start: start.into_iter().map(Into::into).collect(),
            win: win.into_iter().map(Into::into).collect(),
            fail: fail.into_iter().map(Into::into).collect(),
        }
    }

    /// Per-app event names, one per class. A blank name keeps that class's
    /// defaults; a configured one replaces them.
    pub fn configured(start: &str, win: &str, fail: &str) -> Self {
        fn class(configured: &str, defaults: [&str; 3]) -> HashSet<String> {
            match configured.trim() {
                "" => defaults.iter().map(|s| s.to_string()).collect(),
                name => HashSet::from([name.to_string()]),
            }
        }

        Self {
            start: class(start, DEFAULT_START_EVENTS),
            win: class(win, DEFAULT_WIN_EVENTS),
            fail: class(fail, DEFAULT_FAIL_EVENTS),
        }
    }

    /// Start wins over terminal classes if a name is listed twice.
    pub fn classify(&self, event_name: &str) -> EventClass {
        if self.start.contains(event_name) {
            EventClass::Start
        } else if self.win.contains(event_name) {
            EventClass::Win
        } else if self.fail.contains(event_name) {
            EventClass::Fail
        } else {
            EventClass::Other
        }
    }
}
