use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{
    AspectResult, AssessmentStatus, Direction, PerformanceBand, Rating, SchoolPerformance,
    ScoreChange, StandardRecord,
};
use crate::term::Term;

pub const INTERVENTION_THRESHOLD: f64 = 1.5;

/// Changes smaller than this are reported as no change.
const MIN_VISIBLE_CHANGE: f64 = 0.1;

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn average_rating<I>(ratings: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<Rating>>,
{
    let (sum, count) = ratings
        .into_iter()
        .flatten()
        .fold((0u32, 0u32), |(sum, count), r| (sum + u32::from(r.value()), count + 1));

    if count == 0 {
        None
    } else {
        Some(round_one_decimal(f64::from(sum) / f64::from(count)))
    }
}

pub fn aspect_status(
    completed: usize,
    total: usize,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> AssessmentStatus {
    let status = if completed == 0 {
        AssessmentStatus::NotStarted
    } else if completed == total {
        AssessmentStatus::Completed
    } else {
        AssessmentStatus::InProgress
    };

    match due_date {
        Some(due) if status != AssessmentStatus::Completed && due < today => {
            AssessmentStatus::Overdue
        }
        _ => status,
    }
}

pub fn school_status<I>(statuses: I) -> AssessmentStatus
where
    I: IntoIterator<Item = AssessmentStatus>,
{
    statuses
        .into_iter()
        .max_by_key(|s| s.severity())
        .unwrap_or(AssessmentStatus::NotStarted)
}

pub fn summarize_aspects<'a, I>(records: I, today: NaiveDate) -> Vec<AspectResult>
where
    I: IntoIterator<Item = &'a StandardRecord>,
{
    let mut grouped: BTreeMap<&str, Vec<&StandardRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.aspect_code.as_str()).or_default().push(record);
    }

    grouped
        .into_values()
        .map(|standards| {
            let first = standards[0];
            let total = standards.len();
            let completed = standards.iter().filter(|s| s.rating.is_some()).count();
            let due_date = standards.iter().filter_map(|s| s.due_date).max();
            let status = aspect_status(completed, total, due_date, today);
            let average = average_rating(standards.iter().map(|s| s.rating));

            AspectResult {
                aspect_code: first.aspect_code.clone(),
                aspect_name: first.aspect_name.clone(),
                status,
                average,
                completed_standards: completed,
                total_standards: total,
                low_rated_standards: standards
                    .iter()
                    .filter(|s| s.rating.is_some_and(Rating::is_low))
                    .count(),
                intervention_required: status == AssessmentStatus::Completed
                    && average.is_some_and(|avg| avg <= INTERVENTION_THRESHOLD),
                due_date,
                last_updated: standards.iter().filter_map(|s| s.last_updated).max(),
            }
        })
        .collect()
}

pub fn completed_aspect_mean(aspects: &[AspectResult]) -> Option<f64> {
    let scores: Vec<f64> = aspects
        .iter()
        .filter(|a| a.status == AssessmentStatus::Completed)
        .filter_map(|a| a.average)
        .collect();

    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

#[derive(Debug, Clone)]
pub struct TermRollup {
    pub term: Term,
    pub schools: BTreeMap<String, SchoolAspects>,
}

#[derive(Debug, Clone)]
pub struct SchoolAspects {
    pub school_name: String,
    pub aspects: Vec<AspectResult>,
}

impl SchoolAspects {
    pub fn overall_score(&self) -> Option<f64> {
        completed_aspect_mean(&self.aspects)
    }

    pub fn aspect_score(&self, aspect_code: &str) -> Option<f64> {
        self.aspects
            .iter()
            .find(|a| a.aspect_code == aspect_code && a.status == AssessmentStatus::Completed)
            .and_then(|a| a.average)
    }
}

impl TermRollup {
    pub fn build(records: &[StandardRecord], term: Term, today: NaiveDate) -> Self {
        let mut by_school: BTreeMap<&str, Vec<&StandardRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.term == term) {
            by_school.entry(record.school_id.as_str()).or_default().push(record);
        }

        let schools = by_school
            .into_iter()
            .map(|(school_id, standards)| {
                let school_name = standards[0].school_name.clone();
                let aspects = summarize_aspects(standards, today);
                (
                    school_id.to_string(),
                    SchoolAspects {
                        school_name,
                        aspects,
                    },
                )
            })
            .collect();

        Self { term, schools }
    }

    pub fn school_score(&self, school_id: &str) -> Option<f64> {
        self.schools.get(school_id).and_then(SchoolAspects::overall_score)
    }

    pub fn aspect_score(&self, school_id: &str, aspect_code: &str) -> Option<f64> {
        self.schools
            .get(school_id)
            .and_then(|s| s.aspect_score(aspect_code))
    }
}

/// Per-school performance for `ordered_terms[selected]`, compared with the
/// term that follows it in the newest-first list.
pub fn build_school_performance(
    records: &[StandardRecord],
    ordered_terms: &[Term],
    selected: usize,
    today: NaiveDate,
) -> Vec<SchoolPerformance> {
    let Some(term) = ordered_terms.get(selected).copied() else {
        return Vec::new();
    };

    let current = TermRollup::build(records, term, today);
    let previous = ordered_terms
        .get(selected + 1)
        .map(|prev| TermRollup::build(records, *prev, today));

    let mut schools: Vec<SchoolPerformance> = current
        .schools
        .into_iter()
        .map(|(school_id, school)| {
            let overall_score = school.overall_score();
            let intervention_aspects: BTreeSet<String> = school
                .aspects
                .iter()
                .filter(|a| a.intervention_required)
                .map(|a| a.aspect_code.clone())
                .collect();
            let previous_school = previous.as_ref().and_then(|p| p.schools.get(&school_id));
            let previous_aspect_scores: Vec<(String, f64)> = previous_school
                .map(|p| {
                    p.aspects
                        .iter()
                        .filter_map(|a| {
                            p.aspect_score(&a.aspect_code)
                                .map(|score| (a.aspect_code.clone(), score))
                        })
                        .collect()
                })
                .unwrap_or_default();

            SchoolPerformance {
                status: school_status(school.aspects.iter().map(|a| a.status)),
                last_updated: school
                    .aspects
                    .iter()
                    .filter(|a| a.status == AssessmentStatus::Completed)
                    .filter_map(|a| a.last_updated)
                    .max()
                    .or_else(|| school.aspects.iter().filter_map(|a| a.last_updated).max()),
                previous_score: previous_school.and_then(SchoolAspects::overall_score),
                intervention_count: intervention_aspects.len(),
                intervention_aspects: intervention_aspects.into_iter().collect(),
                previous_aspect_scores,
                school_id,
                school_name: school.school_name,
                term,
                overall_score,
                aspects: school.aspects,
            }
        })
        .collect();

    schools.sort_by(|a, b| a.school_name.cmp(&b.school_name));
    schools
}

pub fn score_change(current: Option<f64>, previous: Option<f64>) -> Option<ScoreChange> {
    let current = current.filter(|c| *c != 0.0)?;
    let previous = previous.filter(|p| *p != 0.0)?;

    let change = current - previous;
    if change.abs() < MIN_VISIBLE_CHANGE {
        return None;
    }

    Some(ScoreChange {
        direction: if change > 0.0 { Direction::Up } else { Direction::Down },
        delta: change.abs(),
        percent: (change / previous).abs() * 100.0,
    })
}

pub fn performance_band(score: f64, intervention_count: usize) -> PerformanceBand {
    if score >= 3.5 && intervention_count == 0 {
        PerformanceBand::Excellent
    } else if score >= 3.0 && intervention_count <= 1 {
        PerformanceBand::Strong
    } else if score >= 2.5 && intervention_count <= 3 {
        PerformanceBand::Good
    } else if score >= 2.0 && intervention_count <= 5 {
        PerformanceBand::Satisfactory
    } else if score >= 1.5 {
        PerformanceBand::NeedsAttention
    } else {
        PerformanceBand::RequiresAttention
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::term::{AcademicYear, Season};

    pub(crate) fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    pub(crate) fn term(season: Season, start: i32) -> Term {
        Term::new(season, AcademicYear::new(start))
    }

    pub(crate) fn record(
        school: &str,
        aspect: &str,
        standard: &str,
        term: Term,
        rating: Option<i32>,
    ) -> StandardRecord {
        StandardRecord {
            assessment_id: format!("{school}-{standard}-{}", term.unique_id()),
            school_id: school.to_string(),
            school_name: format!("{school} school"),
            aspect_code: aspect.to_string(),
            aspect_name: aspect.to_lowercase(),
            standard_code: standard.to_string(),
            standard_name: format!("{standard} standard"),
            term,
            rating: rating.map(|r| Rating::try_from(r).unwrap()),
            evidence: None,
            due_date: None,
            last_updated: None,
        }
    }

    fn ratings(values: &[Option<i32>]) -> Vec<Option<Rating>> {
        values
            .iter()
            .map(|v| v.map(|r| Rating::try_from(r).unwrap()))
            .collect()
    }

    #[test]
    fn average_excludes_nulls_and_rounds() {
        assert_eq!(average_rating(ratings(&[Some(1), Some(2), Some(2), None])), Some(1.7));
        assert_eq!(average_rating(ratings(&[Some(4), None, Some(3)])), Some(3.5));
        assert_eq!(average_rating(ratings(&[Some(3), Some(3), Some(4)])), Some(3.3));
        assert_eq!(average_rating(ratings(&[None, None])), None);
        assert_eq!(average_rating(Vec::<Option<Rating>>::new()), None);
    }

    #[test]
    fn aspect_status_follows_completion() {
        let today = today();
        assert_eq!(aspect_status(0, 3, None, today), AssessmentStatus::NotStarted);
        assert_eq!(aspect_status(2, 3, None, today), AssessmentStatus::InProgress);
        assert_eq!(aspect_status(3, 3, None, today), AssessmentStatus::Completed);

        let past = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert_eq!(aspect_status(2, 3, past, today), AssessmentStatus::Overdue);
        assert_eq!(aspect_status(0, 3, past, today), AssessmentStatus::Overdue);
        assert_eq!(aspect_status(3, 3, past, today), AssessmentStatus::Completed);
    }

    #[test]
    fn school_status_takes_worst_case() {
        use AssessmentStatus::*;
        assert_eq!(school_status([Completed, InProgress, Overdue]), Overdue);
        assert_eq!(school_status([Completed, NotStarted, InProgress]), InProgress);
        assert_eq!(school_status([Completed, NotStarted]), NotStarted);
        assert_eq!(school_status([Completed, Completed]), Completed);
        assert_eq!(school_status(Vec::<AssessmentStatus>::new()), NotStarted);
    }

    #[test]
    fn aspects_group_and_flag_intervention() {
        let t = term(Season::Autumn, 2024);
        let records = vec![
            record("oak", "EDU", "ES1", t, Some(1)),
            record("oak", "EDU", "ES2", t, Some(2)),
            record("oak", "EDU", "ES3", t, Some(1)),
            record("oak", "FIN", "FS1", t, Some(1)),
            record("oak", "FIN", "FS2", t, None),
        ];

        let aspects = summarize_aspects(&records, today());
        assert_eq!(aspects.len(), 2);

        let edu = &aspects[0];
        assert_eq!(edu.aspect_code, "EDU");
        assert_eq!(edu.average, Some(1.3));
        assert_eq!(edu.status, AssessmentStatus::Completed);
        assert!(edu.intervention_required);
        assert_eq!(edu.low_rated_standards, 3);
        assert_eq!(edu.completion_rate(), "3/3");

        // in progress aspects are never flagged
        let fin = &aspects[1];
        assert_eq!(fin.status, AssessmentStatus::InProgress);
        assert_eq!(fin.average, Some(1.0));
        assert!(!fin.intervention_required);
    }

    #[test]
    fn school_at_threshold_needs_intervention() {
        let t = term(Season::Spring, 2024);
        let records = vec![
            record("ash", "EDU", "ES1", t, Some(1)),
            record("ash", "EDU", "ES2", t, Some(2)),
            record("elm", "EDU", "ES1", t, Some(1)),
            record("elm", "EDU", "ES2", t, Some(2)),
            record("elm", "EDU", "ES3", t, Some(2)),
            record("elm", "EDU", "ES4", t, Some(2)),
            record("elm", "EDU", "ES5", t, Some(1)),
        ];

        let schools = build_school_performance(&records, &[t], 0, today());
        let ash = schools.iter().find(|s| s.school_id == "ash").unwrap();
        let elm = schools.iter().find(|s| s.school_id == "elm").unwrap();

        assert_eq!(ash.overall_score, Some(1.5));
        assert_eq!(ash.status, AssessmentStatus::Completed);
        assert!(ash.intervention_required());
        assert_eq!(ash.intervention_aspects, vec!["EDU".to_string()]);

        assert_eq!(elm.overall_score, Some(1.6));
        assert_eq!(elm.status, AssessmentStatus::Completed);
        assert!(!elm.intervention_required());
    }

    #[test]
    fn school_score_averages_completed_aspects_only() {
        let t = term(Season::Summer, 2024);
        let records = vec![
            record("oak", "EDU", "ES1", t, Some(4)),
            record("oak", "HR", "HR1", t, Some(2)),
            record("oak", "FIN", "FS1", t, Some(1)),
            record("oak", "FIN", "FS2", t, None),
        ];

        let schools = build_school_performance(&records, &[t], 0, today());
        assert_eq!(schools.len(), 1);
        assert_eq!(schools[0].overall_score, Some(3.0));
        assert_eq!(schools[0].status, AssessmentStatus::InProgress);
        assert_eq!(schools[0].completed_aspects(), 2);
    }

    #[test]
    fn previous_term_is_next_in_ordered_list() {
        let current = term(Season::Spring, 2024);
        let previous = term(Season::Autumn, 2024);
        let older = term(Season::Summer, 2023);
        let records = vec![
            record("oak", "EDU", "ES1", current, Some(3)),
            record("oak", "EDU", "ES1", previous, Some(2)),
            record("oak", "HR", "HR1", previous, Some(4)),
            record("oak", "EDU", "ES1", older, Some(1)),
        ];

        let ordered = [current, previous, older];
        let schools = build_school_performance(&records, &ordered, 0, today());
        assert_eq!(schools[0].previous_score, Some(3.0));
        assert_eq!(schools[0].previous_aspect_score("EDU"), Some(2.0));
        assert_eq!(schools[0].previous_aspect_score("HR"), Some(4.0));

        let oldest = build_school_performance(&records, &ordered, 2, today());
        assert_eq!(oldest[0].previous_score, None);
    }

    #[test]
    fn past_due_date_makes_aspect_and_school_overdue() {
        let t = term(Season::Spring, 2024);
        let past = NaiveDate::from_ymd_opt(2025, 2, 14);
        let future = NaiveDate::from_ymd_opt(2025, 4, 4);
        let with_due = |standard: &str, aspect: &str, rating, due_date| StandardRecord {
            due_date,
            ..record("oak", aspect, standard, t, rating)
        };
        let records = vec![
            with_due("ES1", "EDU", Some(3), past),
            with_due("ES2", "EDU", None, past),
            with_due("FS1", "FIN", Some(4), past),
            with_due("HR1", "HR", None, future),
        ];

        let aspects = summarize_aspects(&records, today());
        let status: Vec<AssessmentStatus> = aspects.iter().map(|a| a.status).collect();
        assert_eq!(
            status,
            vec![
                AssessmentStatus::Overdue,
                AssessmentStatus::Completed,
                AssessmentStatus::NotStarted
            ]
        );
        assert_eq!(aspects[0].due_date, past);

        let schools = build_school_performance(&records, &[t], 0, today());
        assert_eq!(schools[0].status, AssessmentStatus::Overdue);
        assert_eq!(schools[0].overall_score, Some(4.0));
    }

    #[test]
    fn out_of_range_selection_is_empty() {
        assert!(build_school_performance(&[], &[], 0, today()).is_empty());
    }

    #[test]
    fn score_change_ignores_small_and_missing_values() {
        assert_eq!(score_change(Some(3.0), None), None);
        assert_eq!(score_change(Some(3.0), Some(0.0)), None);
        assert_eq!(score_change(Some(0.0), Some(2.0)), None);
        assert_eq!(score_change(Some(3.0), Some(2.95)), None);

        let up = score_change(Some(3.0), Some(2.0)).unwrap();
        assert_eq!(up.direction, Direction::Up);
        assert!((up.delta - 1.0).abs() < 1e-9);
        assert!((up.percent - 50.0).abs() < 1e-9);

        let down = score_change(Some(2.0), Some(2.5)).unwrap();
        assert_eq!(down.direction, Direction::Down);
        assert!((down.delta - 0.5).abs() < 1e-9);
        assert!((down.percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn performance_bands() {
        assert_eq!(performance_band(3.6, 0), PerformanceBand::Excellent);
        assert_eq!(performance_band(3.6, 1), PerformanceBand::Strong);
        assert_eq!(performance_band(2.7, 3), PerformanceBand::Good);
        assert_eq!(performance_band(2.7, 4), PerformanceBand::Satisfactory);
        assert_eq!(performance_band(2.1, 6), PerformanceBand::NeedsAttention);
        assert_eq!(performance_band(1.2, 0), PerformanceBand::RequiresAttention);
    }
}
