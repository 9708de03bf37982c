use std::collections::BTreeSet;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Rating, StandardRecord};
use crate::term::Term;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub fn assessment_id_for(school_id: &str, standard_code: &str, term: Term) -> String {
    format!("{school_id}-{standard_code}-{}", term.unique_id())
}

pub fn parse_rating(value: Option<i32>) -> anyhow::Result<Option<Rating>> {
    value
        .map(Rating::try_from)
        .transpose()
        .map_err(anyhow::Error::from)
}

async fn upsert_school(
    pool: &PgPool,
    school_id: &str,
    school_name: &str,
    mat_id: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assessment_dashboard.schools (school_id, school_name, mat_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (school_id) DO UPDATE
        SET school_name = EXCLUDED.school_name, mat_id = EXCLUDED.mat_id
        "#,
    )
    .bind(school_id)
    .bind(school_name)
    .bind(mat_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_aspect(pool: &PgPool, aspect_code: &str, aspect_name: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assessment_dashboard.aspects (aspect_code, aspect_name)
        VALUES ($1, $2)
        ON CONFLICT (aspect_code) DO UPDATE
        SET aspect_name = EXCLUDED.aspect_name
        "#,
    )
    .bind(aspect_code)
    .bind(aspect_name)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_standard(
    pool: &PgPool,
    standard_code: &str,
    aspect_code: &str,
    standard_name: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assessment_dashboard.standards (standard_code, aspect_code, standard_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (standard_code) DO UPDATE
        SET aspect_code = EXCLUDED.aspect_code, standard_name = EXCLUDED.standard_name
        "#,
    )
    .bind(standard_code)
    .bind(aspect_code)
    .bind(standard_name)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mat_id = "oak-learning-trust";
    let schools = [
        ("cedar-park-primary", "Cedar Park Primary"),
        ("hawthorn-academy", "Hawthorn Academy"),
        ("willow-brook-secondary", "Willow Brook Secondary"),
    ];
    let aspects = [("EDU", "Education"), ("FIN", "Finance"), ("HR", "Human Resources")];
    let standards = [
        ("ES1", "EDU", "Quality of education"),
        ("ES2", "EDU", "Curriculum intent"),
        ("FS1", "FIN", "Budget monitoring"),
        ("FS2", "FIN", "Procurement controls"),
        ("HR1", "HR", "Safer recruitment"),
    ];
    let terms = [
        Term::parse_label("Summer 2024-2025")?,
        Term::parse_label("Autumn 2025-2026")?,
        Term::parse_label("Spring 2025-2026")?,
    ];

    for (school_id, name) in schools {
        upsert_school(pool, school_id, name, mat_id).await?;
    }
    for (code, name) in aspects {
        upsert_aspect(pool, code, name).await?;
    }
    for (code, aspect, name) in standards {
        upsert_standard(pool, code, aspect, name).await?;
    }

    // ratings per school, one row per term, one column per standard
    let ratings: [[[Option<i32>; 5]; 3]; 3] = [
        [
            [Some(3), Some(3), Some(2), Some(3), Some(3)],
            [Some(3), Some(4), Some(3), Some(3), Some(4)],
            [Some(4), Some(3), Some(3), None, Some(4)],
        ],
        [
            [Some(2), Some(2), Some(2), Some(1), Some(2)],
            [Some(2), Some(1), Some(1), Some(2), Some(2)],
            [Some(1), Some(2), Some(1), Some(1), None],
        ],
        [
            [Some(3), Some(2), Some(3), Some(3), Some(3)],
            [None, None, Some(3), Some(2), None],
            [None, None, None, None, None],
        ],
    ];
    let due = NaiveDate::from_ymd_opt(2026, 4, 3).context("invalid date")?;

    for ((school_id, _), school_ratings) in schools.iter().zip(ratings) {
        for (term, term_ratings) in terms.iter().zip(school_ratings) {
            for ((standard_code, _, _), rating) in standards.iter().zip(term_ratings) {
                let rating = parse_rating(rating)?;
                sqlx::query(
                    r#"
                    INSERT INTO assessment_dashboard.assessments
                    (assessment_id, school_id, standard_code, unique_term_id, rating, due_date)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (assessment_id) DO NOTHING
                    "#,
                )
                .bind(assessment_id_for(school_id, standard_code, *term))
                .bind(*school_id)
                .bind(*standard_code)
                .bind(term.unique_id())
                .bind(rating.map(i32::from))
                .bind(due)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(())
}

pub async fn fetch_standard_records(
    pool: &PgPool,
    mat_id: Option<&str>,
) -> anyhow::Result<Vec<StandardRecord>> {
    let mut query = String::from(
        "SELECT a.assessment_id, s.school_id, s.school_name, asp.aspect_code, asp.aspect_name, \
         st.standard_code, st.standard_name, a.unique_term_id, a.rating, a.evidence_comments, \
         a.due_date, a.last_updated \
         FROM assessment_dashboard.assessments a \
         JOIN assessment_dashboard.schools s ON s.school_id = a.school_id \
         JOIN assessment_dashboard.standards st ON st.standard_code = a.standard_code \
         JOIN assessment_dashboard.aspects asp ON asp.aspect_code = st.aspect_code",
    );

    if mat_id.is_some() {
        query.push_str(" WHERE s.mat_id = $1");
    }
    query.push_str(" ORDER BY s.school_id, a.unique_term_id, st.standard_code");

    let mut rows = sqlx::query(&query);
    if let Some(value) = mat_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut standards = Vec::with_capacity(records.len());

    for row in records {
        let assessment_id: String = row.get("assessment_id");
        let term_id: String = row.get("unique_term_id");
        let rating: Option<i32> = row.get("rating");
        let last_updated: DateTime<Utc> = row.get("last_updated");

        standards.push(StandardRecord {
            term: Term::parse_unique_id(&term_id)
                .with_context(|| format!("assessment {assessment_id} has a bad term"))?,
            rating: parse_rating(rating)
                .with_context(|| format!("assessment {assessment_id} has a bad rating"))?,
            assessment_id,
            school_id: row.get("school_id"),
            school_name: row.get("school_name"),
            aspect_code: row.get("aspect_code"),
            aspect_name: row.get("aspect_name"),
            standard_code: row.get("standard_code"),
            standard_name: row.get("standard_name"),
            evidence: row.get("evidence_comments"),
            due_date: row.get("due_date"),
            last_updated: Some(last_updated),
        });
    }

    tracing::debug!(count = standards.len(), "fetched standard assessments");
    Ok(standards)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        school_id: String,
        school_name: String,
        mat_id: String,
        aspect_code: String,
        aspect_name: String,
        standard_code: String,
        standard_name: String,
        term: String,
        rating: Option<i32>,
        evidence_comments: Option<String>,
        due_date: Option<NaiveDate>,
        assessment_id: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad CSV row {}", line + 2))?;
        let term = Term::parse_any(&row.term)
            .with_context(|| format!("bad term on CSV row {}", line + 2))?;
        let rating = parse_rating(row.rating)
            .with_context(|| format!("bad rating on CSV row {}", line + 2))?;

        upsert_school(pool, &row.school_id, &row.school_name, &row.mat_id).await?;
        upsert_aspect(pool, &row.aspect_code, &row.aspect_name).await?;
        upsert_standard(pool, &row.standard_code, &row.aspect_code, &row.standard_name).await?;

        let assessment_id = row
            .assessment_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| assessment_id_for(&row.school_id, &row.standard_code, term));

        let result = sqlx::query(
            r#"
            INSERT INTO assessment_dashboard.assessments
            (assessment_id, school_id, standard_code, unique_term_id, rating,
             evidence_comments, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&assessment_id)
        .bind(&row.school_id)
        .bind(&row.standard_code)
        .bind(term.unique_id())
        .bind(rating.map(i32::from))
        .bind(&row.evidence_comments)
        .bind(row.due_date)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        } else {
            tracing::debug!(assessment_id = %assessment_id, "assessment already present");
        }
    }

    Ok(inserted)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RatingUpdate {
    pub assessment_id: String,
    pub rating: Option<i32>,
    pub evidence_comments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkUpdateOutcome {
    pub updated: usize,
    pub failed: usize,
}

pub fn read_rating_updates(csv_path: &std::path::Path) -> anyhow::Result<Vec<RatingUpdate>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut updates = Vec::new();
    for (line, result) in reader.deserialize::<RatingUpdate>().enumerate() {
        updates.push(result.with_context(|| format!("bad CSV row {}", line + 2))?);
    }
    Ok(updates)
}

/// Applies ratings in one transaction. Rows with an out-of-range rating or an
/// unknown assessment id count as failed; the rest are written.
pub async fn bulk_update_ratings(
    pool: &PgPool,
    mat_id: Option<&str>,
    updates: &[RatingUpdate],
) -> anyhow::Result<BulkUpdateOutcome> {
    let mut tx = pool.begin().await?;
    let mut outcome = BulkUpdateOutcome::default();
    let batch_id = Uuid::new_v4();

    for update in updates {
        let rating = match parse_rating(update.rating) {
            Ok(rating) => rating,
            Err(err) => {
                tracing::warn!(%batch_id, assessment_id = %update.assessment_id, error = %err, "skipping rating");
                outcome.failed += 1;
                continue;
            }
        };

        let result = sqlx::query(
            r#"
            UPDATE assessment_dashboard.assessments a
            SET rating = $1,
                evidence_comments = $2,
                last_updated = now()
            FROM assessment_dashboard.schools s
            WHERE a.school_id = s.school_id
              AND a.assessment_id = $3
              AND ($4::TEXT IS NULL OR s.mat_id = $4)
            "#,
        )
        .bind(rating.map(i32::from))
        .bind(&update.evidence_comments)
        .bind(&update.assessment_id)
        .bind(mat_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            outcome.updated += 1;
        } else {
            tracing::warn!(%batch_id, assessment_id = %update.assessment_id, "no assessment matched");
            outcome.failed += 1;
        }
    }

    tx.commit().await?;
    tracing::info!(%batch_id, updated = outcome.updated, failed = outcome.failed, "bulk rating update");
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssessment {
    pub assessment_id: String,
    pub school_id: String,
    pub standard_code: String,
    pub term: Term,
    pub due_date: Option<NaiveDate>,
}

pub fn plan_assessments(
    school_ids: &[String],
    standard_codes: &[String],
    term: Term,
    due_date: Option<NaiveDate>,
) -> Vec<NewAssessment> {
    let schools: BTreeSet<&str> = school_ids.iter().map(String::as_str).collect();
    let standards: BTreeSet<&str> = standard_codes.iter().map(String::as_str).collect();

    schools
        .iter()
        .flat_map(|school_id| {
            standards.iter().map(move |standard_code| NewAssessment {
                assessment_id: assessment_id_for(school_id, standard_code, term),
                school_id: school_id.to_string(),
                standard_code: standard_code.to_string(),
                term,
                due_date,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InviteOutcome {
    pub created: usize,
    pub existing: usize,
}

pub async fn create_assessments(
    pool: &PgPool,
    mat_id: Option<&str>,
    school_ids: &[String],
    aspect_code: &str,
    term: Term,
    due_date: Option<NaiveDate>,
) -> anyhow::Result<InviteOutcome> {
    let standard_codes: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT standard_code
        FROM assessment_dashboard.standards
        WHERE aspect_code = $1
        ORDER BY standard_code
        "#,
    )
    .bind(aspect_code)
    .fetch_all(pool)
    .await?;
    if standard_codes.is_empty() {
        anyhow::bail!("aspect {aspect_code} has no standards");
    }

    let known: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT school_id
        FROM assessment_dashboard.schools
        WHERE school_id = ANY($1)
          AND ($2::TEXT IS NULL OR mat_id = $2)
        "#,
    )
    .bind(school_ids)
    .bind(mat_id)
    .fetch_all(pool)
    .await?;
    let unknown: Vec<&str> = school_ids
        .iter()
        .map(String::as_str)
        .filter(|id| !known.iter().any(|k| k == id))
        .collect();
    if !unknown.is_empty() {
        anyhow::bail!("unknown schools: {}", unknown.join(", "));
    }

    let planned = plan_assessments(school_ids, &standard_codes, term, due_date);
    let mut tx = pool.begin().await?;
    let mut outcome = InviteOutcome::default();

    for row in &planned {
        let result = sqlx::query(
            r#"
            INSERT INTO assessment_dashboard.assessments
            (assessment_id, school_id, standard_code, unique_term_id, due_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&row.assessment_id)
        .bind(&row.school_id)
        .bind(&row.standard_code)
        .bind(row.term.unique_id())
        .bind(row.due_date)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            outcome.created += 1;
        } else {
            outcome.existing += 1;
        }
    }

    tx.commit().await?;
    tracing::info!(
        aspect_code,
        term = %term,
        created = outcome.created,
        existing = outcome.existing,
        "assessments opened"
    );
    Ok(outcome)
}
