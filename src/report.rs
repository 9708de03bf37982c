use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{AspectSummary, AssessmentStatus, SchoolPerformance};
use crate::overlay::DashboardView;
use crate::rollup::{self, score_change};
use crate::term::Term;
use crate::trend::{SchoolTrend, Sparkline};

pub fn summarize_by_aspect(schools: &[SchoolPerformance]) -> Vec<AspectSummary> {
    let mut map: BTreeMap<&str, (String, usize, Vec<f64>, usize)> = BTreeMap::new();

    for school in schools {
        for aspect in &school.aspects {
            let entry = map
                .entry(aspect.aspect_code.as_str())
                .or_insert_with(|| (aspect.aspect_name.clone(), 0, Vec::new(), 0));
            entry.1 += 1;
            if aspect.status == AssessmentStatus::Completed {
                if let Some(avg) = aspect.average {
                    entry.2.push(avg);
                }
            }
            if aspect.intervention_required {
                entry.3 += 1;
            }
        }
    }

    let mut summaries: Vec<AspectSummary> = map
        .into_iter()
        .map(|(code, (name, school_count, scores, interventions))| AspectSummary {
            aspect_code: code.to_string(),
            aspect_name: name,
            school_count,
            completed_count: scores.len(),
            avg_score: if scores.is_empty() {
                None
            } else {
                Some(rollup::round_one_decimal(
                    scores.iter().sum::<f64>() / scores.len() as f64,
                ))
            },
            intervention_count: interventions,
        })
        .collect();

    summaries.sort_by(|a, b| b.intervention_count.cmp(&a.intervention_count));
    summaries
}

pub fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) if score > 0.0 => format!("{score:.1}"),
        _ => "—".to_string(),
    }
}

pub fn format_change(school: &SchoolPerformance) -> String {
    match score_change(school.overall_score, school.previous_score) {
        Some(change) => format!(
            "{} {:.1} ({:.0}%)",
            change.direction.arrow(),
            change.delta,
            change.percent
        ),
        None => String::new(),
    }
}

/// Summary sparkline first, local history as the fallback.
pub fn trend_for(
    view: &DashboardView,
    trends: &BTreeMap<String, SchoolTrend>,
    school_id: &str,
) -> Sparkline {
    view.summary_trend(school_id)
        .or_else(|| trends.get(school_id).map(|t| t.overall.clone()))
        .unwrap_or(Sparkline::Placeholder)
}

pub fn build_report(
    term: Term,
    previous: Option<Term>,
    view: &DashboardView,
    trends: &BTreeMap<String, SchoolTrend>,
) -> String {
    let schools = &view.schools;
    let summaries = summarize_by_aspect(schools);

    let mut output = String::new();

    let _ = writeln!(output, "# Trust Assessment Dashboard");
    match previous {
        Some(prev) => {
            let _ = writeln!(output, "Generated for {term} (compared with {prev})");
        }
        None => {
            let _ = writeln!(output, "Generated for {term}");
        }
    }
    if let Some(warning) = &view.warning {
        let _ = writeln!(output);
        let _ = writeln!(output, "> Warning: {warning}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let scored: Vec<f64> = schools.iter().filter_map(|s| s.overall_score).collect();
    let trust_avg = if scored.is_empty() {
        None
    } else {
        Some(scored.iter().sum::<f64>() / scored.len() as f64)
    };
    let _ = writeln!(output, "- Schools: {}", schools.len());
    let _ = writeln!(
        output,
        "- Completed: {}",
        schools
            .iter()
            .filter(|s| s.status == AssessmentStatus::Completed)
            .count()
    );
    let _ = writeln!(output, "- Trust average score: {}", format_score(trust_avg));
    let _ = writeln!(
        output,
        "- Schools requiring intervention: {}",
        schools.iter().filter(|s| s.intervention_required()).count()
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## School Performance");

    if schools.is_empty() {
        let _ = writeln!(output, "No assessments recorded for this term.");
    } else {
        let _ = writeln!(
            output,
            "| School | Status | Score | Change | Band | Interventions | Trend |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for school in schools {
            let band = school
                .overall_score
                .map(|score| rollup::performance_band(score, school.intervention_count).label())
                .unwrap_or("No Data");
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                school.school_name,
                school.status,
                format_score(school.overall_score),
                format_change(school),
                band,
                school.intervention_count,
                trend_for(view, trends, &school.school_id).render()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Aspect Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No aspects assessed for this term.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {} ({}): avg {} across {}/{} completed schools, {} flagged",
                summary.aspect_name,
                summary.aspect_code,
                format_score(summary.avg_score),
                summary.completed_count,
                summary.school_count,
                summary.intervention_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Intervention Required");

    let flagged: Vec<&SchoolPerformance> =
        schools.iter().filter(|s| s.intervention_required()).collect();
    if flagged.is_empty() {
        let _ = writeln!(output, "No schools require intervention this term.");
    } else {
        for school in flagged {
            let aspects: Vec<String> = school
                .aspects
                .iter()
                .filter(|a| a.intervention_required)
                .map(|a| {
                    format!(
                        "{} {} ({} low-rated of {})",
                        a.aspect_name,
                        format_score(a.average),
                        a.low_rated_standards,
                        a.total_standards
                    )
                })
                .collect();
            let detail = if aspects.is_empty() {
                format!("overall score {}", format_score(school.overall_score))
            } else {
                aspects.join("; ")
            };
            let _ = writeln!(output, "- {}: {}", school.school_name, detail);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::build_school_performance;
    use crate::rollup::tests::{record, term, today};
    use crate::term::Season;

    #[test]
    fn aspect_mix_counts_completed_and_flagged() {
        let t = term(Season::Autumn, 2025);
        let records = vec![
            record("oak", "EDU", "ES1", t, Some(4)),
            record("ash", "EDU", "ES1", t, Some(1)),
            record("ash", "HR", "HR1", t, None),
        ];
        let schools = build_school_performance(&records, &[t], 0, today());
        let summaries = summarize_by_aspect(&schools);

        assert_eq!(summaries[0].aspect_code, "EDU");
        assert_eq!(summaries[0].school_count, 2);
        assert_eq!(summaries[0].completed_count, 2);
        assert_eq!(summaries[0].avg_score, Some(2.5));
        assert_eq!(summaries[0].intervention_count, 1);
        assert_eq!(summaries[1].avg_score, None);
    }

    #[test]
    fn report_lists_schools_and_interventions() {
        let current = term(Season::Spring, 2025);
        let previous = term(Season::Autumn, 2025);
        let records = vec![
            record("oak", "EDU", "ES1", current, Some(4)),
            record("oak", "EDU", "ES1", previous, Some(3)),
            record("ash", "EDU", "ES1", current, Some(1)),
            record("ash", "EDU", "ES2", current, Some(2)),
        ];
        let ordered = [current, previous];
        let schools = build_school_performance(&records, &ordered, 0, today());
        let view = DashboardView::local(schools);

        let report = build_report(current, Some(previous), &view, &BTreeMap::new());
        assert!(report.contains("Generated for Spring 2025-2026 (compared with Autumn 2025-2026)"));
        assert!(report.contains("| oak school | Completed | 4.0 | ↑ 1.0 (33%) | Excellent | 0 | — |"));
        assert!(report.contains("- ash school: edu 1.5 (2 low-rated of 2)"));
        assert!(!report.contains("> Warning"));
    }

    #[test]
    fn report_surfaces_summary_warning() {
        let mut view = DashboardView::local(Vec::new());
        view.warning = Some("Dashboard summary unavailable".to_string());
        let report = build_report(term(Season::Summer, 2024), None, &view, &BTreeMap::new());
        assert!(report.contains("> Warning: Dashboard summary unavailable"));
        assert!(report.contains("No assessments recorded for this term."));
    }
}
