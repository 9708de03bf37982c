use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{AspectResult, Direction, PreviousTermScore, StandardRecord, TrendPoint};
use crate::rollup::{self, TermRollup};
use crate::term::Term;

pub const HISTORY_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Sparkline {
    Chart {
        points: Vec<TrendPoint>,
        direction: Direction,
    },
    Placeholder,
}

impl Sparkline {
    /// Points must already be oldest first.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = TrendPoint>,
    {
        let points: Vec<TrendPoint> = points.into_iter().filter(|p| p.score > 0.0).collect();
        if points.len() < 2 {
            return Sparkline::Placeholder;
        }

        let first = points[0].score;
        let last = points[points.len() - 1].score;
        let direction = if last > first {
            Direction::Up
        } else if last < first {
            Direction::Down
        } else {
            Direction::Flat
        };

        Sparkline::Chart { points, direction }
    }

    /// Builds from a summary's `previous_terms`, which arrive newest first.
    pub fn from_previous_terms(previous: &[PreviousTermScore]) -> Self {
        let mut points: Vec<TrendPoint> = previous
            .iter()
            .take(HISTORY_DEPTH)
            .filter_map(|p| {
                let term = match Term::parse_unique_id(&p.term_id) {
                    Ok(term) => term,
                    Err(err) => {
                        tracing::warn!(term_id = %p.term_id, error = %err, "ignoring summary term");
                        return None;
                    }
                };
                Some(TrendPoint {
                    term,
                    score: p.avg_score.unwrap_or(0.0),
                })
            })
            .collect();
        points.reverse();
        Self::from_points(points)
    }

    pub fn is_chart(&self) -> bool {
        matches!(self, Sparkline::Chart { .. })
    }

    pub fn points(&self) -> &[TrendPoint] {
        match self {
            Sparkline::Chart { points, .. } => points,
            Sparkline::Placeholder => &[],
        }
    }

    pub fn render(&self) -> String {
        const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        match self {
            Sparkline::Placeholder => "—".to_string(),
            Sparkline::Chart { points, direction } => {
                let bars: String = points
                    .iter()
                    .map(|p| {
                        let scaled = ((p.score.clamp(1.0, 4.0) - 1.0) / 3.0 * 7.0).round();
                        BARS[scaled as usize]
                    })
                    .collect();
                format!("{bars} {}", direction.arrow())
            }
        }
    }
}

pub fn history_terms(ordered: &[Term], selected: usize) -> Vec<Term> {
    let mut terms: Vec<Term> = ordered
        .iter()
        .skip(selected + 1)
        .take(HISTORY_DEPTH)
        .copied()
        .collect();
    terms.reverse();
    terms
}

pub fn build_trend<F>(ordered: &[Term], selected: usize, mut score_for: F) -> Sparkline
where
    F: FnMut(&Term) -> Option<f64>,
{
    if selected >= ordered.len() {
        return Sparkline::Placeholder;
    }
    Sparkline::from_points(history_terms(ordered, selected).into_iter().map(|term| {
        TrendPoint {
            score: score_for(&term).unwrap_or(0.0),
            term,
        }
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchoolTrend {
    pub overall: Sparkline,
    pub aspects: BTreeMap<String, Sparkline>,
}

pub fn school_trends(
    records: &[StandardRecord],
    ordered: &[Term],
    selected: usize,
    today: NaiveDate,
) -> BTreeMap<String, SchoolTrend> {
    let rollups: Vec<TermRollup> = history_terms(ordered, selected)
        .into_iter()
        .map(|term| TermRollup::build(records, term, today))
        .collect();
    let score_in = |term: &Term, f: &dyn Fn(&TermRollup) -> Option<f64>| {
        rollups.iter().find(|r| r.term == *term).and_then(f)
    };

    let school_ids: BTreeSet<&String> = rollups.iter().flat_map(|r| r.schools.keys()).collect();

    school_ids
        .into_iter()
        .map(|school_id| {
            let overall = build_trend(ordered, selected, |term| {
                score_in(term, &|r: &TermRollup| r.school_score(school_id))
            });

            let aspect_codes: BTreeSet<&String> = rollups
                .iter()
                .filter_map(|r| r.schools.get(school_id))
                .flat_map(|s| s.aspects.iter().map(|a| &a.aspect_code))
                .collect();
            let aspects = aspect_codes
                .into_iter()
                .map(|code| {
                    let line = build_trend(ordered, selected, |term| {
                        score_in(term, &|r: &TermRollup| r.aspect_score(school_id, code))
                    });
                    (code.clone(), line)
                })
                .collect();

            (school_id.clone(), SchoolTrend { overall, aspects })
        })
        .collect()
}

/// Previous scores count only aspects completed in that term.
#[derive(Debug, Clone)]
pub struct AspectDrillDown<'a> {
    pub standards: Vec<&'a StandardRecord>,
    pub result: AspectResult,
    pub previous: Vec<(Term, Option<f64>)>,
}

pub fn aspect_drill_down<'a>(
    records: &'a [StandardRecord],
    ordered: &[Term],
    selected: usize,
    school_id: &str,
    aspect_code: &str,
    today: NaiveDate,
) -> Option<AspectDrillDown<'a>> {
    let term = ordered.get(selected).copied()?;
    let mut standards: Vec<&StandardRecord> = records
        .iter()
        .filter(|r| {
            r.term == term
                && r.school_id == school_id
                && r.aspect_code.eq_ignore_ascii_case(aspect_code)
        })
        .collect();
    standards.sort_by(|a, b| a.standard_code.cmp(&b.standard_code));
    let result = rollup::summarize_aspects(standards.iter().copied(), today)
        .into_iter()
        .next()?;

    let previous = history_terms(ordered, selected)
        .into_iter()
        .map(|prev| {
            let score =
                TermRollup::build(records, prev, today).aspect_score(school_id, &result.aspect_code);
            (prev, score)
        })
        .collect();

    Some(AspectDrillDown {
        standards,
        result,
        previous,
    })
}
