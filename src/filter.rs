use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{AssessmentStatus, SchoolPerformance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceFilter {
    Excellent,
    Good,
    RequiresImprovement,
    Inadequate,
    NoData,
}

impl PerformanceFilter {
    pub fn matches(self, score: Option<f64>) -> bool {
        let score = score.unwrap_or(0.0);
        match self {
            PerformanceFilter::Excellent => score >= 3.5,
            PerformanceFilter::Good => (2.5..3.5).contains(&score),
            PerformanceFilter::RequiresImprovement => (1.5..2.5).contains(&score),
            PerformanceFilter::Inadequate => score > 0.0 && score < 1.5,
            PerformanceFilter::NoData => score == 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusFilter {
    Completed,
    InProgress,
    NotStarted,
    Overdue,
}

impl StatusFilter {
    fn status(self) -> AssessmentStatus {
        match self {
            StatusFilter::Completed => AssessmentStatus::Completed,
            StatusFilter::InProgress => AssessmentStatus::InProgress,
            StatusFilter::NotStarted => AssessmentStatus::NotStarted,
            StatusFilter::Overdue => AssessmentStatus::Overdue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    School,
    Completion,
    Score,
    Interventions,
    LastUpdated,
}

/// Every list is an "any of" match; empty lists and `None` match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardFilters {
    pub search: Option<String>,
    pub performance: Vec<PerformanceFilter>,
    pub status: Vec<StatusFilter>,
    pub aspects: Vec<String>,
    pub schools: Vec<String>,
    pub intervention_only: bool,
}

impl DashboardFilters {
    pub fn is_empty(&self) -> bool {
        *self == DashboardFilters::default()
    }

    pub fn matches(&self, school: &SchoolPerformance) -> bool {
        let matches_search = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                school.school_name.to_lowercase().contains(&needle)
                    || school.school_id.to_lowercase().contains(&needle)
            }
        };

        let matches_performance = self.performance.is_empty()
            || self.performance.iter().any(|p| p.matches(school.overall_score));

        let matches_status = self.status.is_empty()
            || self
                .status
                .iter()
                .any(|s| school.aspects.iter().any(|a| a.status == s.status()));

        let matches_aspect = self.aspects.is_empty()
            || self.aspects.iter().any(|code| {
                school
                    .aspects
                    .iter()
                    .any(|a| a.aspect_code.eq_ignore_ascii_case(code))
            });

        let matches_school = self.schools.is_empty() || self.schools.contains(&school.school_id);
        let matches_intervention = !self.intervention_only || school.intervention_count > 0;

        matches_search
            && matches_performance
            && matches_status
            && matches_aspect
            && matches_school
            && matches_intervention
    }

    pub fn apply(&self, schools: Vec<SchoolPerformance>) -> Vec<SchoolPerformance> {
        schools.into_iter().filter(|s| self.matches(s)).collect()
    }
}

fn completion_ratio(school: &SchoolPerformance) -> f64 {
    if school.aspects.is_empty() {
        0.0
    } else {
        school.completed_aspects() as f64 / school.aspects.len() as f64
    }
}

pub fn sort_schools(schools: &mut [SchoolPerformance], key: SortKey, descending: bool) {
    schools.sort_by(|a, b| {
        let ordering = match key {
            SortKey::School => a.school_name.cmp(&b.school_name),
            SortKey::Completion => completion_ratio(a)
                .partial_cmp(&completion_ratio(b))
                .unwrap_or(Ordering::Equal),
            SortKey::Score => a
                .overall_score
                .unwrap_or(0.0)
                .partial_cmp(&b.overall_score.unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
            SortKey::Interventions => a.intervention_count.cmp(&b.intervention_count),
            SortKey::LastUpdated => a.last_updated.cmp(&b.last_updated),
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}
