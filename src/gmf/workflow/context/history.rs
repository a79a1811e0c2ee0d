// SPDX-License-Identifier: MIT

//! Append-only record of the states an individual has left

use serde::Serialize;

use crate::sim::Time;

/// One visited state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Module the state belongs to
    pub module: String,
    /// 0 for the root module; each submodule call gets the next number
    pub segment: usize,
    pub state: String,
    pub entered: Time,
    pub exited: Time,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: HistoryEntry) {
        log::trace!(
            "{}[{}] left '{}' at {}",
            entry.module,
            entry.segment,
            entry.state,
            entry.exited
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one module, oldest first
    pub fn for_module<'a, 'm>(
        &'a self,
        module: &'m str,
    ) -> impl DoubleEndedIterator<Item = &'a HistoryEntry> + 'm
    where
        'a: 'm,
    {
        self.entries.iter().filter(move |e| e.module == module)
    }

    /// Entries of one segment, oldest first
    pub fn segment(&self, segment: usize) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.entries.iter().filter(move |e| e.segment == segment)
    }

    /// Most recent exit from the named state of a module
    pub fn last_exit(&self, module: &str, state: &str) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.module == module && e.state == state)
    }

    /// State names in visiting order
    pub fn states(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.state.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(module: &str, segment: usize, state: &str, year: i32) -> HistoryEntry {
        let t = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap();
        HistoryEntry {
            module: module.into(),
            segment,
            state: state.into(),
            entered: t,
            exited: t,
        }
    }

    #[test]
    fn test_filters() {
        let mut history = History::new();
        assert!(history.is_empty());
        history.push(entry("main", 0, "Initial", 2000));
        history.push(entry("sub", 1, "Initial", 2001));
        history.push(entry("main", 0, "Wait", 2002));
        history.push(entry("sub", 2, "Initial", 2003));

        assert_eq!(history.len(), 4);
        assert_eq!(history.for_module("sub").count(), 2);
        assert_eq!(history.segment(0).count(), 2);
        assert_eq!(history.segment(2).count(), 1);
        assert_eq!(
            history.last_exit("sub", "Initial").map(|e| e.segment),
            Some(2)
        );
        assert_eq!(history.states(), vec!["Initial", "Initial", "Wait", "Initial"]);
    }
}
