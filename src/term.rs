use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TermError {
    #[error("term label `{0}` is not in the form \"<Season> <YYYY-YYYY>\"")]
    MalformedLabel(String),
    #[error("unknown season `{0}` (expected Autumn, Spring or Summer)")]
    UnknownSeason(String),
    #[error("unknown term id `{0}` (expected T1, T2 or T3)")]
    UnknownTermId(String),
    #[error("academic year `{0}` must look like 2024-2025 or 2024-25")]
    MalformedYear(String),
    #[error("academic year `{0}` does not span consecutive years")]
    NonConsecutiveYear(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Season {
    Autumn,
    Spring,
    Summer,
}

impl Season {
    pub fn parse(value: &str) -> Result<Self, TermError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "autumn" => Ok(Season::Autumn),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            _ => Err(TermError::UnknownSeason(value.to_string())),
        }
    }

    pub fn from_term_id(value: &str) -> Result<Self, TermError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "T1" => Ok(Season::Autumn),
            "T2" => Ok(Season::Spring),
            "T3" => Ok(Season::Summer),
            _ => Err(TermError::UnknownTermId(value.to_string())),
        }
    }

    pub fn term_id(self) -> &'static str {
        match self {
            Season::Autumn => "T1",
            Season::Spring => "T2",
            Season::Summer => "T3",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Season::Autumn => "Autumn",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcademicYear {
    start: i32,
}

impl AcademicYear {
    pub fn new(start: i32) -> Self {
        Self { start }
    }

    /// Accepts the long (`2024-2025`) and short (`2024-25`) spellings.
    pub fn parse(value: &str) -> Result<Self, TermError> {
        let trimmed = value.trim();
        let (start, end) = trimmed
            .split_once('-')
            .ok_or_else(|| TermError::MalformedYear(value.to_string()))?;

        if start.len() != 4 || !start.chars().all(|c| c.is_ascii_digit()) {
            return Err(TermError::MalformedYear(value.to_string()));
        }
        if !end.chars().all(|c| c.is_ascii_digit()) {
            return Err(TermError::MalformedYear(value.to_string()));
        }

        let start: i32 = start
            .parse()
            .map_err(|_| TermError::MalformedYear(value.to_string()))?;
        let end: i32 = match end.len() {
            4 => end
                .parse()
                .map_err(|_| TermError::MalformedYear(value.to_string()))?,
            2 => {
                let short: i32 = end
                    .parse()
                    .map_err(|_| TermError::MalformedYear(value.to_string()))?;
                (start / 100) * 100 + short + if short < start % 100 { 100 } else { 0 }
            }
            _ => return Err(TermError::MalformedYear(value.to_string())),
        };

        if end != start + 1 {
            return Err(TermError::NonConsecutiveYear(value.to_string()));
        }

        Ok(Self::new(start))
    }

    pub fn long(self) -> String {
        format!("{}-{}", self.start, self.start + 1)
    }

    pub fn short(self) -> String {
        format!("{}-{:02}", self.start, (self.start + 1).rem_euclid(100))
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term {
    pub season: Season,
    pub year: AcademicYear,
}

impl Term {
    pub fn new(season: Season, year: AcademicYear) -> Self {
        Self { season, year }
    }

    pub fn parse_label(label: &str) -> Result<Self, TermError> {
        let mut parts = label.split_whitespace();
        let (Some(season), Some(year), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TermError::MalformedLabel(label.to_string()));
        };
        Ok(Self {
            season: Season::parse(season)?,
            year: AcademicYear::parse(year)?,
        })
    }

    pub fn parse_unique_id(id: &str) -> Result<Self, TermError> {
        let (term_id, year) = id
            .trim()
            .split_once('-')
            .ok_or_else(|| TermError::MalformedLabel(id.to_string()))?;
        Ok(Self {
            season: Season::from_term_id(term_id)?,
            year: AcademicYear::parse(year)?,
        })
    }

    pub fn parse_any(value: &str) -> Result<Self, TermError> {
        let trimmed = value.trim();
        if trimmed.starts_with(['T', 't']) && !trimmed.contains(' ') {
            Self::parse_unique_id(trimmed)
        } else {
            Self::parse_label(trimmed)
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.season, self.year.long())
    }

    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.season.term_id(), self.year.short())
    }

    /// Compares two terms so that the newer one sorts as `Greater`.
    pub fn chronological_cmp(&self, other: &Self, ordering: SeasonOrdering) -> Ordering {
        self.year
            .cmp(&other.year)
            .then_with(|| ordering.rank(self.season).cmp(&ordering.rank(other.season)))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.season, self.year.long())
    }
}

impl Serialize for Term {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Term::parse_any(&raw).map_err(serde::de::Error::custom)
    }
}

/// How seasons rank against each other inside one academic year.
///
/// Two rankings have been in use for the same data: the academic calendar
/// (Autumn, then Spring, then Summer) and an older one that treated Autumn as
/// the most recent term of its year. Callers choose explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeasonOrdering {
    #[default]
    #[value(name = "academic")]
    AcademicCalendar,
    #[value(name = "legacy-autumn-first")]
    LegacyAutumnFirst,
}

impl SeasonOrdering {
    /// Higher rank means more recent within the same academic year.
    pub fn rank(self, season: Season) -> u8 {
        match (self, season) {
            (SeasonOrdering::AcademicCalendar, Season::Autumn) => 1,
            (SeasonOrdering::AcademicCalendar, Season::Spring) => 2,
            (SeasonOrdering::AcademicCalendar, Season::Summer) => 3,
            (SeasonOrdering::LegacyAutumnFirst, Season::Spring) => 1,
            (SeasonOrdering::LegacyAutumnFirst, Season::Summer) => 2,
            (SeasonOrdering::LegacyAutumnFirst, Season::Autumn) => 3,
        }
    }
}

pub fn sort_terms_desc<I>(terms: I, ordering: SeasonOrdering) -> Vec<Term>
where
    I: IntoIterator<Item = Term>,
{
    let unique: BTreeSet<(AcademicYear, Season)> =
        terms.into_iter().map(|t| (t.year, t.season)).collect();
    let mut sorted: Vec<Term> = unique
        .into_iter()
        .map(|(year, season)| Term::new(season, year))
        .collect();
    sorted.sort_by(|a, b| b.chronological_cmp(a, ordering));
    sorted
}

pub fn sort_labels_desc<'a, I>(labels: I, ordering: SeasonOrdering) -> Vec<Term>
where
    I: IntoIterator<Item = &'a str>,
{
    let parsed = labels.into_iter().filter_map(|label| match Term::parse_label(label) {
        Ok(term) => Some(term),
        Err(err) => {
            tracing::warn!(label, error = %err, "skipping unparseable term label");
            None
        }
    });
    sort_terms_desc(parsed, ordering)
}

pub fn select_term(ordered: &[Term], requested: Option<Term>) -> Option<(usize, Term)> {
    if let Some(term) = requested {
        if let Some(index) = ordered.iter().position(|t| *t == term) {
            return Some((index, term));
        }
        tracing::warn!(term = %term, "requested term has no assessments, using latest");
    }
    ordered.first().map(|term| (0, *term))
}
