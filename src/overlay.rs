use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

use crate::models::{SchoolDashboardItem, SchoolPerformance, SchoolsDashboard};
use crate::term::Term;
use crate::trend::Sparkline;

/// Parses a dashboard summary body. Older servers answer `[]` when there are
/// no assessments at all; that is read as an empty summary.
pub fn parse_summary(raw: &str) -> anyhow::Result<SchoolsDashboard> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("dashboard summary is not valid JSON")?;
    if value.is_array() {
        return Ok(SchoolsDashboard {
            current_term: None,
            schools: Vec::new(),
        });
    }
    serde_json::from_value(value).context("dashboard summary has an unexpected shape")
}

pub fn load_summary(path: &Path) -> anyhow::Result<SchoolsDashboard> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dashboard summary {}", path.display()))?;
    parse_summary(&raw)
}

pub fn overlay_summary(
    local: Vec<SchoolPerformance>,
    summary: &SchoolsDashboard,
) -> Vec<SchoolPerformance> {
    let by_school: HashMap<&str, &SchoolDashboardItem> = summary
        .schools
        .iter()
        .map(|item| (item.school_id.as_str(), item))
        .collect();

    local
        .into_iter()
        .map(|school| match by_school.get(school.school_id.as_str()) {
            Some(item) => apply_item(school, item),
            None => school,
        })
        .collect()
}

fn apply_item(school: SchoolPerformance, item: &SchoolDashboardItem) -> SchoolPerformance {
    let previous_score = item
        .previous_terms
        .first()
        .and_then(|p| p.avg_score)
        .or(school.previous_score);

    SchoolPerformance {
        status: item.status,
        overall_score: item.current_score,
        previous_score,
        intervention_count: item.intervention_required,
        last_updated: item.last_updated.or(school.last_updated),
        ..school
    }
}

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub schools: Vec<SchoolPerformance>,
    pub summary: Option<SchoolsDashboard>,
    pub warning: Option<String>,
}

impl DashboardView {
    pub fn local(schools: Vec<SchoolPerformance>) -> Self {
        Self {
            schools,
            summary: None,
            warning: None,
        }
    }

    /// Merges a summary load result over local rows. A failed load or a
    /// summary for another term keeps the local rows and records a warning.
    pub fn resolve(
        local: Vec<SchoolPerformance>,
        loaded: anyhow::Result<SchoolsDashboard>,
        selected: Term,
    ) -> Self {
        let summary = match loaded {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "using locally computed scores");
                return Self {
                    schools: local,
                    summary: None,
                    warning: Some(format!(
                        "Dashboard summary unavailable ({err:#}); showing locally computed scores."
                    )),
                };
            }
        };

        if let Some(current) = summary.current_term.as_deref() {
            match Term::parse_any(current) {
                Ok(term) if term == selected => {}
                Ok(term) => {
                    tracing::warn!(summary_term = %term, selected = %selected, "summary is for another term");
                    return Self {
                        schools: local,
                        summary: None,
                        warning: Some(format!(
                            "Dashboard summary is for {term}, not {selected}; showing locally computed scores."
                        )),
                    };
                }
                Err(err) => {
                    tracing::warn!(current, error = %err, "summary term does not parse");
                    return Self {
                        schools: local,
                        summary: None,
                        warning: Some(format!(
                            "Dashboard summary term `{current}` is invalid; showing locally computed scores."
                        )),
                    };
                }
            }
        }

        Self {
            schools: overlay_summary(local, &summary),
            summary: Some(summary),
            warning: None,
        }
    }

    pub fn summary_trend(&self, school_id: &str) -> Option<Sparkline> {
        self.summary
            .as_ref()?
            .schools
            .iter()
            .find(|item| item.school_id == school_id)
            .map(|item| Sparkline::from_previous_terms(&item.previous_terms))
            .filter(Sparkline::is_chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentStatus, PreviousTermScore};
    use crate::rollup::build_school_performance;
    use crate::rollup::tests::{record, term, today};
    use crate::term::Season;

    fn local() -> Vec<SchoolPerformance> {
        let current = term(Season::Spring, 2025);
        let previous = term(Season::Autumn, 2025);
        let records = vec![
            record("oak", "EDU", "ES1", current, Some(3)),
            record("oak", "EDU", "ES2", current, None),
            record("oak", "EDU", "ES1", previous, Some(2)),
            record("elm", "EDU", "ES1", current, Some(4)),
        ];
        build_school_performance(&records, &[current, previous], 0, today())
    }

    fn summary_json() -> &'static str {
        r#"{
            "current_term": "T2-2025-26",
            "schools": [{
                "school_id": "oak",
                "school_name": "oak school",
                "current_term": "T2-2025-26",
                "status": "completed",
                "current_score": 2.8,
                "previous_terms": [
                    {"term_id": "T1-2025-26", "academic_year": "2025-26", "avg_score": 2.4},
                    {"term_id": "T3-2024-25", "academic_year": "2024-25", "avg_score": 2.0}
                ],
                "intervention_required": 2,
                "completed_standards": 15,
                "total_standards": 41,
                "completion_rate": "15/41",
                "last_updated": "2025-11-02T10:00:00Z"
            }]
        }"#
    }

    #[test]
    fn bare_array_is_empty_summary() {
        let summary = parse_summary("[]").unwrap();
        assert!(summary.schools.is_empty());
        assert!(summary.current_term.is_none());
    }

    #[test]
    fn overlay_replaces_summary_fields() {
        let summary = parse_summary(summary_json()).unwrap();
        let schools = overlay_summary(local(), &summary);
        let oak = schools.iter().find(|s| s.school_id == "oak").unwrap();

        assert_eq!(oak.status, AssessmentStatus::Completed);
        assert_eq!(oak.overall_score, Some(2.8));
        assert_eq!(oak.previous_score, Some(2.4));
        assert_eq!(oak.intervention_count, 2);
        assert!(oak.last_updated.is_some());
        // aspect detail stays local
        assert_eq!(oak.aspects.len(), 1);
        assert_eq!(oak.aspects[0].status, AssessmentStatus::InProgress);
    }

    #[test]
    fn schools_missing_from_summary_pass_through() {
        let before = local();
        let summary = parse_summary(summary_json()).unwrap();
        let after = overlay_summary(before.clone(), &summary);

        let elm_before = before.iter().find(|s| s.school_id == "elm").unwrap();
        let elm_after = after.iter().find(|s| s.school_id == "elm").unwrap();
        assert_eq!(elm_before, elm_after);
    }

    #[test]
    fn missing_previous_terms_keep_local_previous_score() {
        let mut summary = parse_summary(summary_json()).unwrap();
        summary.schools[0].previous_terms = vec![PreviousTermScore {
            term_id: "T1-2025-26".to_string(),
            academic_year: "2025-26".to_string(),
            avg_score: None,
        }];
        summary.schools[0].last_updated = None;

        let schools = overlay_summary(local(), &summary);
        let oak = schools.iter().find(|s| s.school_id == "oak").unwrap();
        assert_eq!(oak.previous_score, Some(2.0));
        assert_eq!(oak.last_updated, None);
    }

    #[test]
    fn failed_load_keeps_local_rows_with_warning() {
        let selected = term(Season::Spring, 2025);
        let view = DashboardView::resolve(
            local(),
            Err(anyhow::anyhow!("connection refused")),
            selected,
        );
        assert_eq!(view.schools, local());
        assert!(view.summary.is_none());
        assert!(view.warning.unwrap().contains("connection refused"));
    }

    #[test]
    fn summary_for_other_term_is_ignored() {
        let selected = term(Season::Summer, 2025);
        let view = DashboardView::resolve(local(), parse_summary(summary_json()), selected);
        assert_eq!(view.schools, local());
        assert!(view.warning.unwrap().contains("Spring 2025-2026"));
    }

    #[test]
    fn matching_summary_is_applied_and_feeds_trends() {
        let selected = term(Season::Spring, 2025);
        let view = DashboardView::resolve(local(), parse_summary(summary_json()), selected);
        assert!(view.warning.is_none());
        let oak = view.schools.iter().find(|s| s.school_id == "oak").unwrap();
        assert_eq!(oak.overall_score, Some(2.8));

        let line = view.summary_trend("oak").unwrap();
        assert_eq!(line.points().len(), 2);
        assert!(view.summary_trend("elm").is_none());
    }

    #[test]
    fn unparseable_summary_term_is_ignored() {
        let selected = term(Season::Spring, 2025);
        let raw = summary_json().replacen("\"T2-2025-26\"", "\"Winter 2025\"", 1);
        let view = DashboardView::resolve(local(), parse_summary(&raw), selected);

        assert_eq!(view.schools, local());
        assert!(view.summary.is_none());
        assert!(view.warning.unwrap().contains("`Winter 2025` is invalid"));
    }
}
