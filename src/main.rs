use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod db;
mod filter;
mod models;
mod overlay;
mod prefs;
mod report;
mod rollup;
mod term;
mod trend;

use filter::{DashboardFilters, PerformanceFilter, SortKey, StatusFilter};
use models::StandardRecord;
use overlay::DashboardView;
use prefs::Preferences;
use term::{SeasonOrdering, Term};

#[derive(Parser)]
#[command(name = "assessment-dashboard")]
#[command(about = "Term-by-term self-assessment dashboard for multi-academy trusts", long_about = None)]
struct Cli {
    /// Restrict every query to one trust
    #[arg(long, global = true)]
    mat: Option<String>,
    /// How seasons rank within an academic year
    #[arg(long, global = true, value_enum, default_value_t = SeasonOrdering::AcademicCalendar)]
    season_order: SeasonOrdering,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import standard assessments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Open an aspect for one or more schools in a term
    Invite {
        #[arg(long = "school", required = true)]
        schools: Vec<String>,
        #[arg(long)]
        aspect: String,
        #[arg(long, value_parser = Term::parse_any)]
        term: Term,
        /// Due date as YYYY-MM-DD
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// Apply a batch of standard ratings from a CSV file
    Rate {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List terms newest first
    Terms {
        /// Sort these labels instead of the terms in the database
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Per-school scores for one term
    Dashboard {
        #[command(flatten)]
        view: ViewArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        #[arg(long)]
        desc: bool,
        /// Show each school's aspects
        #[arg(long)]
        detail: bool,
        /// Save the selected term and filters for later runs
        #[arg(long)]
        remember: bool,
    },
    /// Score history for the terms before the selected one
    Trends {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long)]
        school: Option<String>,
    },
    /// Standards of one aspect for one school
    Aspect {
        #[arg(long)]
        school: String,
        #[arg(long)]
        aspect: String,
        #[arg(long, value_parser = Term::parse_any)]
        term: Option<Term>,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct ViewArgs {
    /// Term label (`Spring 2025-2026`) or id (`T2-2025-26`); defaults to the latest
    #[arg(long, value_parser = Term::parse_any)]
    term: Option<Term>,
    /// Bulk dashboard summary JSON to overlay on local scores
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum)]
    performance: Vec<PerformanceFilter>,
    #[arg(long, value_enum)]
    status: Vec<StatusFilter>,
    #[arg(long = "aspect")]
    aspects: Vec<String>,
    #[arg(long = "school")]
    schools: Vec<String>,
    #[arg(long)]
    intervention_only: bool,
}

impl From<FilterArgs> for DashboardFilters {
    fn from(args: FilterArgs) -> Self {
        DashboardFilters {
            search: args.search,
            performance: args.performance,
            status: args.status,
            aspects: args.aspects,
            schools: args.schools,
            intervention_only: args.intervention_only,
        }
    }
}

struct Selection {
    records: Vec<StandardRecord>,
    ordered: Vec<Term>,
    index: usize,
    term: Term,
}

impl Selection {
    fn previous(&self) -> Option<Term> {
        self.ordered.get(self.index + 1).copied()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn select(
    pool: &PgPool,
    mat: Option<&str>,
    ordering: SeasonOrdering,
    requested: Option<Term>,
) -> anyhow::Result<Option<Selection>> {
    let records = db::fetch_standard_records(pool, mat).await?;
    let ordered = term::sort_terms_desc(records.iter().map(|r| r.term), ordering);
    let Some((index, term)) = term::select_term(&ordered, requested) else {
        return Ok(None);
    };
    tracing::info!(term = %term, available = ordered.len(), "selected term");
    Ok(Some(Selection {
        records,
        ordered,
        index,
        term,
    }))
}

fn build_view(selection: &Selection, summary: Option<&Path>) -> DashboardView {
    let today = Utc::now().date_naive();
    let local = rollup::build_school_performance(
        &selection.records,
        &selection.ordered,
        selection.index,
        today,
    );
    match summary {
        Some(path) => DashboardView::resolve(local, overlay::load_summary(path), selection.term),
        None => DashboardView::local(local),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mat = cli.mat.as_deref();
    let ordering = cli.season_order;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} assessments from {}.", csv.display());
        }
        Commands::Invite {
            schools,
            aspect,
            term,
            due,
        } => {
            let pool = connect().await?;
            let outcome = db::create_assessments(&pool, mat, &schools, &aspect, term, due).await?;
            println!(
                "Opened {aspect} for {} schools in {term}: {} assessments created, {} already present.",
                schools.len(),
                outcome.created,
                outcome.existing
            );
        }
        Commands::Rate { csv } => {
            let updates = db::read_rating_updates(&csv)?;
            let pool = connect().await?;
            let outcome = db::bulk_update_ratings(&pool, mat, &updates).await?;
            println!(
                "Updated {} assessments ({} failed).",
                outcome.updated, outcome.failed
            );
        }
        Commands::Terms { labels } => {
            let ordered = if labels.is_empty() {
                let pool = connect().await?;
                let records = db::fetch_standard_records(&pool, mat).await?;
                term::sort_terms_desc(records.iter().map(|r| r.term), ordering)
            } else {
                term::sort_labels_desc(labels.iter().map(String::as_str), ordering)
            };

            if ordered.is_empty() {
                println!("No terms found.");
                return Ok(());
            }
            for (index, term) in ordered.iter().enumerate() {
                let marker = if index == 0 { " (latest)" } else { "" };
                println!("{:>2}. {} [{}]{}", index + 1, term, term.unique_id(), marker);
            }
        }
        Commands::Dashboard {
            view,
            filters,
            sort,
            desc,
            detail,
            remember,
        } => {
            let prefs_path = prefs::prefs_path();
            let saved = Preferences::load(&prefs_path);
            let mut filters = DashboardFilters::from(filters);
            if filters.is_empty() && !saved.filters.is_empty() {
                tracing::info!("using remembered filters");
                filters = saved.filters.clone();
            }

            let pool = connect().await?;
            let requested = view.term.or(saved.selected_term);
            let Some(selection) = select(&pool, mat, ordering, requested).await? else {
                println!("No assessments found.");
                return Ok(());
            };

            if remember {
                let prefs = Preferences {
                    selected_term: Some(selection.term),
                    filters: filters.clone(),
                };
                prefs.save(&prefs_path)?;
            }

            let dashboard = build_view(&selection, view.summary.as_deref());
            let mut schools = filters.apply(dashboard.schools.clone());
            if let Some(key) = sort {
                filter::sort_schools(&mut schools, key, desc);
            }
            let today = Utc::now().date_naive();
            let trends = trend::school_trends(
                &selection.records,
                &selection.ordered,
                selection.index,
                today,
            );

            match selection.previous() {
                Some(prev) => println!("Dashboard for {} (previous: {prev})", selection.term),
                None => println!("Dashboard for {}", selection.term),
            }
            if let Some(warning) = &dashboard.warning {
                println!("Warning: {warning}");
            }
            if schools.is_empty() {
                println!("No schools match these filters.");
                return Ok(());
            }

            for school in &schools {
                let band = school
                    .overall_score
                    .map(|s| rollup::performance_band(s, school.intervention_count).label())
                    .unwrap_or("No Data");
                println!(
                    "- {} [{}] score {} {} | {} | interventions {} | aspects {}/{} | trend {}",
                    school.school_name,
                    school.status,
                    report::format_score(school.overall_score),
                    report::format_change(school),
                    band,
                    school.intervention_count,
                    school.completed_aspects(),
                    school.aspects.len(),
                    report::trend_for(&dashboard, &trends, &school.school_id).render()
                );

                if detail {
                    for aspect in &school.aspects {
                        let change = rollup::score_change(
                            aspect.average,
                            school.previous_aspect_score(&aspect.aspect_code),
                        )
                        .map(|c| format!(" {} {:.1}", c.direction.arrow(), c.delta))
                        .unwrap_or_default();
                        let flag = if aspect.intervention_required {
                            " intervention required"
                        } else {
                            ""
                        };
                        println!(
                            "    {} ({}): {}{} [{}] {} standards, {} low-rated{}",
                            aspect.aspect_name,
                            aspect.aspect_code,
                            report::format_score(aspect.average),
                            change,
                            aspect.status,
                            aspect.completion_rate(),
                            aspect.low_rated_standards,
                            flag
                        );
                    }
                }
            }
        }
        Commands::Trends { view, school } => {
            let pool = connect().await?;
            let Some(selection) = select(&pool, mat, ordering, view.term).await? else {
                println!("No assessments found.");
                return Ok(());
            };
            let dashboard = build_view(&selection, view.summary.as_deref());
            let today = Utc::now().date_naive();
            let trends = trend::school_trends(
                &selection.records,
                &selection.ordered,
                selection.index,
                today,
            );

            println!("Trends before {}", selection.term);
            if let Some(warning) = &dashboard.warning {
                println!("Warning: {warning}");
            }

            for perf in dashboard
                .schools
                .iter()
                .filter(|s| school.as_deref().map_or(true, |id| s.school_id == id))
            {
                let line = report::trend_for(&dashboard, &trends, &perf.school_id);
                let points: Vec<String> = line
                    .points()
                    .iter()
                    .map(|p| format!("{} {:.1}", p.term.unique_id(), p.score))
                    .collect();
                println!(
                    "- {}: {} {}",
                    perf.school_name,
                    line.render(),
                    points.join(", ")
                );
                if let Some(local) = trends.get(&perf.school_id) {
                    for (code, aspect_line) in &local.aspects {
                        println!("    {code}: {}", aspect_line.render());
                    }
                }
            }
        }
        Commands::Aspect {
            school,
            aspect,
            term: requested,
        } => {
            let pool = connect().await?;
            let Some(selection) = select(&pool, mat, ordering, requested).await? else {
                println!("No assessments found.");
                return Ok(());
            };
            let today = Utc::now().date_naive();
            let Some(drill) = trend::aspect_drill_down(
                &selection.records,
                &selection.ordered,
                selection.index,
                &school,
                &aspect,
                today,
            ) else {
                println!("No {aspect} assessment for {school} in {}.", selection.term);
                return Ok(());
            };

            let result = &drill.result;
            println!(
                "{} for {} in {}: {} [{}] {} standards",
                result.aspect_name,
                drill.standards[0].school_name,
                selection.term,
                report::format_score(result.average),
                result.status,
                result.completion_rate()
            );
            if let Some(due) = result.due_date {
                println!("Due {due}");
            }
            for standard in &drill.standards {
                let rating = standard
                    .rating
                    .map(|r| format!("{} {}", r.value(), r.label()))
                    .unwrap_or_else(|| "Not Rated".to_string());
                println!(
                    "- {} {} ({}): {}",
                    standard.standard_code,
                    standard.standard_name,
                    standard.assessment_id,
                    rating
                );
                if let Some(evidence) = standard.evidence.as_deref().filter(|e| !e.is_empty()) {
                    println!("    {evidence}");
                }
            }

            let previous: Vec<String> = drill
                .previous
                .iter()
                .map(|(prev, score)| format!("{} {}", prev.unique_id(), report::format_score(*score)))
                .collect();
            if !previous.is_empty() {
                println!("Previous terms: {}", previous.join(", "));
            }
        }
        Commands::Report { view, out } => {
            let pool = connect().await?;
            let Some(selection) = select(&pool, mat, ordering, view.term).await? else {
                println!("No assessments found.");
                return Ok(());
            };
            let dashboard = build_view(&selection, view.summary.as_deref());
            let today = Utc::now().date_naive();
            let trends = trend::school_trends(
                &selection.records,
                &selection.ordered,
                selection.index,
                today,
            );
            let report =
                report::build_report(selection.term, selection.previous(), &dashboard, &trends);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_dashboard_flags() {
        let cli = Cli::try_parse_from([
            "assessment-dashboard",
            "--season-order",
            "legacy-autumn-first",
            "dashboard",
            "--term",
            "T2-2025-26",
            "--status",
            "overdue",
            "--performance",
            "no-data",
            "--sort",
            "last-updated",
            "--desc",
        ])
        .unwrap();

        assert_eq!(cli.season_order, SeasonOrdering::LegacyAutumnFirst);
        let Commands::Dashboard {
            view,
            filters,
            sort,
            desc,
            ..
        } = cli.command
        else {
            panic!("expected dashboard");
        };
        assert_eq!(view.term.unwrap().label(), "Spring 2025-2026");
        assert_eq!(sort, Some(SortKey::LastUpdated));
        assert!(desc);
        let filters = DashboardFilters::from(filters);
        assert_eq!(filters.status, vec![StatusFilter::Overdue]);
        assert_eq!(filters.performance, vec![PerformanceFilter::NoData]);
    }

    #[test]
    fn cli_rejects_bad_term() {
        let err = Cli::try_parse_from(["assessment-dashboard", "report", "--term", "Winter 2024"]);
        assert!(err.is_err());
    }

    #[test]
    fn cli_parses_invite() {
        let cli = Cli::try_parse_from([
            "assessment-dashboard",
            "invite",
            "--school",
            "cedar-park-primary",
            "--school",
            "hawthorn-academy",
            "--aspect",
            "EDU",
            "--term",
            "Summer 2025-2026",
            "--due",
            "2026-07-10",
        ])
        .unwrap();

        let Commands::Invite {
            schools,
            aspect,
            term,
            due,
        } = cli.command
        else {
            panic!("expected invite");
        };
        assert_eq!(schools.len(), 2);
        assert_eq!(aspect, "EDU");
        assert_eq!(term.unique_id(), "T3-2025-26");
        assert_eq!(due, NaiveDate::from_ymd_opt(2026, 7, 10));

        let missing_school =
            Cli::try_parse_from(["assessment-dashboard", "invite", "--aspect", "EDU", "--term", "T1-2025-26"]);
        assert!(missing_school.is_err());
    }
}
