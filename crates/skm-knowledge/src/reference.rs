// SPDX-License-Identifier: MIT OR Apache-2.0
//! A single dated symbol-use attribution.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// One dated attribution of one symbol use.
///
/// Stored as a proleptic ordinal day so the serialized form is a bare
/// integer. Immutable once created; a reference's activation depends only on
/// how many days ago it was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference {
    day: i32,
}

impl Reference {
    /// A reference authored on `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            day: date.num_days_from_ce(),
        }
    }

    /// A reference from a stored proleptic ordinal day.
    pub fn from_ordinal(day: i32) -> Self {
        Self { day }
    }

    /// The proleptic ordinal day this reference was authored.
    pub fn ordinal(&self) -> i32 {
        self.day
    }

    /// Current weight of this reference as seen from `today`:
    /// `max(0.1, 1 / (1 + exp(d/300 − 4)))` with `d` the age in days.
    ///
    /// A sigmoidal decay: roughly flat for ~3 years, then falling toward the
    /// floor of 0.1.
    pub fn activation(&self, today: NaiveDate) -> f64 {
        let days_ago = f64::from(today.num_days_from_ce() - self.day);
        (1.0 / (1.0 + (days_ago / 300.0 - 4.0).exp())).max(0.1)
    }
}
