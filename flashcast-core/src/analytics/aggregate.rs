//! Shared aggregation primitives for the campaign and cross-group engines.
//!
//! Both engines feed instances into an [`Accumulator`] and derive their
//! rates and averages through the same helpers, so a metric means the same
//! thing in every report.

use crate::types::QuestionInstance;
use serde::Serialize;
use std::collections::HashSet;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `numerator / denominator` as a percentage rounded to two decimals;
/// 0 when the denominator is 0.
pub fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64 * 100.0)
}

/// Mean of the values, or `None` when there are none.
pub fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

/// Format a mean response time given in minutes.
///
/// The mean is rounded to whole minutes first; an hour or more renders as
/// `"{h}h {m}m"`, anything shorter as `"{n}min"`.
pub fn format_response_time(minutes: f64) -> String {
    let total = if minutes.is_finite() {
        minutes.round().max(0.0) as i64
    } else {
        0
    };
    if total >= 60 {
        format!("{}h {}m", total / 60, total % 60)
    } else {
        format!("{}min", total)
    }
}

/// Running totals over a set of question instances.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    pub sent: usize,
    pub answered: usize,
    pub students_received: HashSet<String>,
    pub students_answered: HashSet<String>,
    pub score_sum: f64,
    pub score_count: usize,
    pub response_minutes_sum: f64,
    pub response_count: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one instance sent to `student` (an already-resolved identity key).
    pub fn record(&mut self, student: &str, instance: &QuestionInstance) {
        self.sent += 1;
        self.students_received.insert(student.to_string());

        if !instance.is_answered() {
            return;
        }

        self.answered += 1;
        self.students_answered.insert(student.to_string());

        if let Some(score) = instance.score() {
            self.score_sum += score;
            self.score_count += 1;
        }
        if let Some(minutes) = instance.response_minutes() {
            self.response_minutes_sum += minutes;
            self.response_count += 1;
        }
    }

    /// Raw (0-10) mean of the numeric grades.
    pub fn mean_score(&self) -> Option<f64> {
        mean(self.score_sum, self.score_count)
    }

    /// Mean grade scaled to 0-100, rounded to two decimals.
    pub fn average_score(&self) -> f64 {
        self.mean_score().map(|s| round2(s * 10.0)).unwrap_or(0.0)
    }

    /// Answered instances over sent instances.
    pub fn completion_rate(&self) -> f64 {
        rate(self.answered, self.sent)
    }

    /// Distinct answering students over roster size.
    pub fn participation_rate(&self, roster_size: usize) -> f64 {
        rate(self.students_answered.len(), roster_size)
    }

    pub fn mean_response_minutes(&self) -> f64 {
        mean(self.response_minutes_sum, self.response_count).unwrap_or(0.0)
    }

    pub fn average_response_time(&self) -> String {
        format_response_time(self.mean_response_minutes())
    }

    /// Derive the standard overview against a roster of `roster_size`.
    pub fn overview(&self, roster_size: usize) -> AccumulatedOverview {
        AccumulatedOverview {
            total_students: self.students_answered.len(),
            total_students_received: self.students_received.len(),
            sent_questions: self.sent,
            answered_questions: self.answered,
            completion_rate: self.completion_rate(),
            average_score: self.average_score(),
            average_response_time: self.average_response_time(),
            participation_rate: self.participation_rate(roster_size),
            total_group_participants: roster_size,
        }
    }
}

/// Metrics derived from an [`Accumulator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatedOverview {
    /// Distinct students who answered at least once
    pub total_students: usize,
    /// Distinct students who received at least one question
    pub total_students_received: usize,
    pub sent_questions: usize,
    pub answered_questions: usize,
    pub completion_rate: f64,
    pub average_score: f64,
    pub average_response_time: String,
    pub participation_rate: f64,
    pub total_group_participants: usize,
}
