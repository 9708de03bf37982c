use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::term::Term;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rating {0} is outside 1-4")]
pub struct RatingError(pub i32);

/// A standard's rating: 1 Inadequate, 2 Requires Improvement, 3 Good, 4 Outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rating(u8);

impl Rating {
    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Inadequate",
            2 => "Requires Improvement",
            3 => "Good",
            _ => "Outstanding",
        }
    }

    pub fn is_low(self) -> bool {
        self.0 <= 2
    }
}

impl TryFrom<i32> for Rating {
    type Error = RatingError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1..=4 => Ok(Rating(value as u8)),
            _ => Err(RatingError(value)),
        }
    }
}

impl From<Rating> for i32 {
    fn from(rating: Rating) -> Self {
        i32::from(rating.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    NotStarted,
    InProgress,
    #[serde(alias = "approved")]
    Completed,
    Overdue,
}

impl AssessmentStatus {
    /// Higher is worse when rolling aspect statuses up to a school.
    pub fn severity(self) -> u8 {
        match self {
            AssessmentStatus::Completed => 0,
            AssessmentStatus::NotStarted => 1,
            AssessmentStatus::InProgress => 2,
            AssessmentStatus::Overdue => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AssessmentStatus::NotStarted => "Not Started",
            AssessmentStatus::InProgress => "In Progress",
            AssessmentStatus::Completed => "Completed",
            AssessmentStatus::Overdue => "Overdue",
        }
    }
}

impl fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct StandardRecord {
    pub assessment_id: String,
    pub school_id: String,
    pub school_name: String,
    pub aspect_code: String,
    pub aspect_name: String,
    pub standard_code: String,
    pub standard_name: String,
    pub term: Term,
    pub rating: Option<Rating>,
    pub evidence: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AspectResult {
    pub aspect_code: String,
    pub aspect_name: String,
    pub status: AssessmentStatus,
    pub average: Option<f64>,
    pub completed_standards: usize,
    pub total_standards: usize,
    pub low_rated_standards: usize,
    pub intervention_required: bool,
    pub due_date: Option<NaiveDate>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AspectResult {
    pub fn completion_rate(&self) -> String {
        format!("{}/{}", self.completed_standards, self.total_standards)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchoolPerformance {
    pub school_id: String,
    pub school_name: String,
    pub term: Term,
    pub status: AssessmentStatus,
    pub overall_score: Option<f64>,
    pub previous_score: Option<f64>,
    pub aspects: Vec<AspectResult>,
    pub previous_aspect_scores: Vec<(String, f64)>,
    pub intervention_aspects: Vec<String>,
    /// Count shown in the interventions column; the overlay may replace it.
    pub intervention_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SchoolPerformance {
    pub fn intervention_required(&self) -> bool {
        self.intervention_count > 0
            || (self.status == AssessmentStatus::Completed
                && self
                    .overall_score
                    .is_some_and(|score| score <= crate::rollup::INTERVENTION_THRESHOLD))
    }

    pub fn completed_aspects(&self) -> usize {
        self.aspects
            .iter()
            .filter(|a| a.status == AssessmentStatus::Completed)
            .count()
    }

    pub fn previous_aspect_score(&self, aspect_code: &str) -> Option<f64> {
        self.previous_aspect_scores
            .iter()
            .find(|(code, _)| code == aspect_code)
            .map(|(_, score)| *score)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AspectSummary {
    pub aspect_code: String,
    pub aspect_name: String,
    pub school_count: usize,
    pub completed_count: usize,
    pub avg_score: Option<f64>,
    pub intervention_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn arrow(self) -> &'static str {
        match self {
            Direction::Up => "↑",
            Direction::Down => "↓",
            Direction::Flat => "—",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreChange {
    pub direction: Direction,
    pub delta: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBand {
    Excellent,
    Strong,
    Good,
    Satisfactory,
    NeedsAttention,
    RequiresAttention,
}

impl PerformanceBand {
    pub fn label(self) -> &'static str {
        match self {
            PerformanceBand::Excellent => "Excellent",
            PerformanceBand::Strong => "Strong",
            PerformanceBand::Good => "Good",
            PerformanceBand::Satisfactory => "Satisfactory",
            PerformanceBand::NeedsAttention => "Needs Attention",
            PerformanceBand::RequiresAttention => "Requires Attention",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendPoint {
    pub term: Term,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchoolsDashboard {
    pub current_term: Option<String>,
    #[serde(default)]
    pub schools: Vec<SchoolDashboardItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchoolDashboardItem {
    pub school_id: String,
    pub school_name: String,
    pub current_term: Option<String>,
    pub status: AssessmentStatus,
    pub current_score: Option<f64>,
    #[serde(default)]
    pub previous_terms: Vec<PreviousTermScore>,
    pub intervention_required: usize,
    #[serde(default)]
    pub completed_standards: usize,
    #[serde(default)]
    pub total_standards: usize,
    #[serde(default)]
    pub completion_rate: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PreviousTermScore {
    pub term_id: String,
    pub academic_year: String,
    pub avg_score: Option<f64>,
}
