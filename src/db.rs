//! Postgres storage: schema migration, demo seed, CSV import, and the
//! source implementations the engine reads through.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SourceError, SourceResult};
use crate::ingest::{self, resolve_answer};
use crate::metrics::{combine_all, CombinedMetrics, InstructorStatsRecord};
use crate::models::{RawAnswerRow, ResponseRow, SurveySummary, TextAnswer};
use crate::paging::PagedResult;
use crate::question::{
    compare_display_order, merge_question_stats, QuestionStat, QuestionType, SatisfactionCategory,
};
use crate::sanitize::{self, AnswerValue};
use crate::source::{DetailPage, DetailRequest, DetailSource, StatsFilter, StatsSource};
use crate::weighted::{weighted_average, WeightedMean};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const ANSWER_QUERY: &str = r#"
    SELECT s.id AS survey_id, r.id AS response_id, s.education_year, s.education_round,
           s.course_name, s.is_active, r.is_test, q.id AS question_id, q.question_text,
           q.question_type, q.satisfaction_category, q.order_index, a.value
    FROM survey_stats.answers a
    JOIN survey_stats.responses r ON r.id = a.response_id
    JOIN survey_stats.surveys s ON s.id = r.survey_id
    JOIN survey_stats.questions q ON q.survey_id = s.id AND q.id = a.question_id
    WHERE ($1::INTEGER IS NULL OR s.education_year = $1)
      AND ($2::INTEGER IS NULL OR s.education_round = $2)
      AND ($3::TEXT IS NULL OR s.course_name = $3)
      AND ($4::UUID IS NULL OR s.id = $4)
      AND ($5::BOOLEAN OR NOT r.is_test)
    ORDER BY s.education_year, s.education_round, r.submitted_at NULLS LAST, r.id
"#;

fn answer_from_row(row: &PgRow) -> SourceResult<Option<RawAnswerRow>> {
    let raw_type: String = row.try_get("question_type")?;
    let Some(question_type) = QuestionType::parse(&raw_type) else {
        return Ok(None);
    };
    let category: Option<String> = row.try_get("satisfaction_category")?;

    Ok(Some(RawAnswerRow {
        survey_id: row.try_get("survey_id")?,
        response_id: row.try_get("response_id")?,
        education_year: row.try_get("education_year")?,
        education_round: row.try_get("education_round")?,
        course_name: row.try_get("course_name")?,
        survey_active: row.try_get("is_active")?,
        is_test: row.try_get("is_test")?,
        question_id: row.try_get("question_id")?,
        question_text: row.try_get("question_text")?,
        question_type,
        satisfaction_category: category.as_deref().and_then(SatisfactionCategory::parse),
        order_index: row.try_get("order_index")?,
        value: row.try_get("value")?,
    }))
}

/// Postgres-backed data source for both the bulk and the paged path.
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_answers(
        &self,
        filter: &StatsFilter,
        survey_id: Option<Uuid>,
        include_test_data: bool,
    ) -> SourceResult<Vec<RawAnswerRow>> {
        let rows = sqlx::query(ANSWER_QUERY)
            .bind(filter.education_year)
            .bind(filter.education_round)
            .bind(filter.course_name.as_deref())
            .bind(survey_id)
            .bind(include_test_data)
            .fetch_all(&self.pool)
            .await?;

        let mut answers = Vec::with_capacity(rows.len());
        let mut unknown_types = 0usize;
        for row in &rows {
            match answer_from_row(row)? {
                Some(answer) => answers.push(answer),
                None => unknown_types += 1,
            }
        }
        if unknown_types > 0 {
            debug!(unknown_types, "skipped answers with an unknown question type");
        }
        Ok(answers)
    }

    async fn fetch_response_page(
        &self,
        survey_id: Uuid,
        include_test_data: bool,
        cursor: u64,
        limit: u64,
        answers: &[RawAnswerRow],
    ) -> SourceResult<PagedResult<ResponseRow>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM survey_stats.responses \
             WHERE survey_id = $1 AND ($2::BOOLEAN OR NOT is_test)",
        )
        .bind(survey_id)
        .bind(include_test_data)
        .fetch_one(&self.pool)
        .await?;
        let total = total.max(0) as u64;

        if limit == 0 {
            return Ok(PagedResult::skipped(cursor, total));
        }

        let offset = i64::try_from(cursor)
            .map_err(|_| SourceError::malformed("cursor", format!("offset {cursor} out of range")))?;
        let rows = sqlx::query(
            r#"
            SELECT id, submitted_at, is_test
            FROM survey_stats.responses
            WHERE survey_id = $1 AND ($2::BOOLEAN OR NOT is_test)
            ORDER BY submitted_at DESC NULLS LAST, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(survey_id)
        .bind(include_test_data)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut per_response: HashMap<Uuid, (u64, WeightedMean)> = HashMap::new();
        for answer in answers {
            let resolved = resolve_answer(answer);
            if resolved == AnswerValue::Unknown {
                continue;
            }
            let entry = per_response.entry(answer.response_id).or_default();
            entry.0 += 1;
            entry.1.push(resolved.as_number(), 1.0);
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let response_id: Uuid = row.try_get("id")?;
            let (answer_count, mean) = per_response.get(&response_id).copied().unwrap_or_default();
            items.push(ResponseRow {
                response_id,
                submitted_at: row.try_get("submitted_at")?,
                is_test: row.try_get("is_test")?,
                answer_count,
                avg_rating: mean.value(),
            });
        }
        Ok(PagedResult::from_window(items, cursor, total))
    }
}

fn text_answers_of(answers: &[RawAnswerRow]) -> Vec<TextAnswer> {
    let mut texts: Vec<TextAnswer> = answers
        .iter()
        .filter_map(|answer| {
            let resolved = resolve_answer(answer);
            resolved.as_text().map(|text| TextAnswer {
                response_id: answer.response_id,
                question_id: answer.question_id.clone(),
                question_text: answer.question_text.clone(),
                order_index: answer.order_index,
                answer: text.to_string(),
            })
        })
        .collect();
    texts.sort_by(|a, b| compare_display_order(a.order_index, &a.question_text, b.order_index, &b.question_text));
    texts
}

fn survey_summary(
    survey_id: Uuid,
    title: String,
    course_name: Option<String>,
    records: &[InstructorStatsRecord],
    include_test_data: bool,
) -> SurveySummary {
    let combined = combine_all(records, include_test_data);
    let average = |select: fn(&CombinedMetrics) -> Option<f64>| {
        weighted_average(combined.iter().map(|m| (select(m), m.response_count as f64)))
    };
    SurveySummary {
        survey_id: Some(survey_id),
        title: Some(title),
        course_name,
        total_responses: combined.iter().map(|m| m.response_count).sum(),
        test_responses: if include_test_data {
            records.iter().map(|r| r.test.response_count).sum()
        } else {
            0
        },
        avg_course: average(|m| m.avg_course),
        avg_instructor: average(|m| m.avg_instructor),
        avg_operation: average(|m| m.avg_operation),
        avg_overall: average(|m| m.avg_overall),
    }
}

#[async_trait]
impl StatsSource for PgSource {
    async fn fetch_records(&self, filter: &StatsFilter) -> SourceResult<Vec<InstructorStatsRecord>> {
        let answers = self.fetch_answers(filter, None, true).await?;
        let records = ingest::build_records(&answers);
        info!(answers = answers.len(), records = records.len(), "aggregated survey answers");
        Ok(records)
    }
}

#[async_trait]
impl DetailSource for PgSource {
    async fn fetch_detail(&self, request: &DetailRequest) -> SourceResult<DetailPage> {
        let survey = sqlx::query("SELECT title, course_name FROM survey_stats.surveys WHERE id = $1")
            .bind(request.survey_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SourceError::SurveyNotFound {
                survey_id: request.survey_id,
            })?;

        let answers = self
            .fetch_answers(&StatsFilter::default(), Some(request.survey_id), request.include_test_data)
            .await?;
        // Every page refreshes the summary, so the survey's answers are
        // always read; only the per-track work below is skipped.
        let records = ingest::build_records(&answers);
        let combined = combine_all(&records, request.include_test_data);
        let (distributions, text_answers) = answer_tracks(&answers, &combined, request);

        let responses = self
            .fetch_response_page(
                request.survey_id,
                request.include_test_data,
                request.cursors.responses,
                request.limits.responses,
                &answers,
            )
            .await?;

        Ok(DetailPage {
            summary: survey_summary(
                request.survey_id,
                survey.try_get("title")?,
                survey.try_get("course_name")?,
                &records,
                request.include_test_data,
            ),
            responses,
            distributions,
            text_answers,
        })
    }
}

/// Question and comment tracks of a detail page. A track with a zero limit
/// is only counted, never merged or sorted.
fn answer_tracks(
    answers: &[RawAnswerRow],
    combined: &[CombinedMetrics],
    request: &DetailRequest,
) -> (PagedResult<QuestionStat>, PagedResult<TextAnswer>) {
    let distributions = if request.limits.distributions == 0 {
        let total = combined
            .iter()
            .flat_map(|metrics| &metrics.question_stats)
            .map(QuestionStat::merge_key)
            .collect::<HashSet<_>>()
            .len();
        PagedResult::skipped(request.cursors.distributions, total as u64)
    } else {
        let questions = merge_question_stats(combined.iter().map(|m| m.question_stats.as_slice()));
        PagedResult::slice(&questions, request.cursors.distributions, request.limits.distributions)
    };

    let text_answers = if request.limits.text_answers == 0 {
        let total = answers
            .iter()
            .filter(|answer| resolve_answer(answer).as_text().is_some())
            .count();
        PagedResult::skipped(request.cursors.text_answers, total as u64)
    } else {
        let texts = text_answers_of(answers);
        PagedResult::slice(&texts, request.cursors.text_answers, request.limits.text_answers)
    };

    (distributions, text_answers)
}

struct SeedQuestion {
    id: &'static str,
    text: &'static str,
    question_type: QuestionType,
    category: Option<SatisfactionCategory>,
    order_index: i32,
}

const SEED_QUESTIONS: [SeedQuestion; 4] = [
    SeedQuestion {
        id: "course-overall",
        text: "How satisfied were you with the course content?",
        question_type: QuestionType::Rating,
        category: Some(SatisfactionCategory::Course),
        order_index: 1,
    },
    SeedQuestion {
        id: "instructor-clarity",
        text: "How clearly did the instructor explain the material?",
        question_type: QuestionType::Rating,
        category: Some(SatisfactionCategory::Instructor),
        order_index: 2,
    },
    SeedQuestion {
        id: "operation-support",
        text: "How well was the program operated?",
        question_type: QuestionType::Scale,
        category: Some(SatisfactionCategory::Operation),
        order_index: 3,
    },
    SeedQuestion {
        id: "free-comment",
        text: "Anything we should improve?",
        question_type: QuestionType::Text,
        category: None,
        order_index: 4,
    },
];

async fn upsert_survey(
    pool: &PgPool,
    title: &str,
    education_year: i32,
    education_round: i32,
    course_name: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO survey_stats.surveys (id, title, education_year, education_round, course_name)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (title, education_year, education_round) DO UPDATE
        SET course_name = EXCLUDED.course_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(title)
    .bind(education_year)
    .bind(education_round)
    .bind(course_name)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

async fn upsert_question(
    pool: &PgPool,
    survey_id: Uuid,
    question_id: &str,
    text: &str,
    question_type: QuestionType,
    category: Option<SatisfactionCategory>,
    order_index: Option<i32>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO survey_stats.questions
        (survey_id, id, question_text, question_type, satisfaction_category, order_index)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (survey_id, id) DO UPDATE
        SET question_text = EXCLUDED.question_text,
            question_type = EXCLUDED.question_type,
            satisfaction_category = EXCLUDED.satisfaction_category,
            order_index = EXCLUDED.order_index
        "#,
    )
    .bind(survey_id)
    .bind(question_id)
    .bind(text)
    .bind(question_type.as_str())
    .bind(category.map(|c| c.as_str()))
    .bind(order_index)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_response(
    pool: &PgPool,
    survey_id: Uuid,
    source_key: &str,
    is_test: bool,
    submitted_at: Option<DateTime<Utc>>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO survey_stats.responses (id, survey_id, is_test, submitted_at, source_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_key) DO UPDATE SET source_key = EXCLUDED.source_key
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(survey_id)
    .bind(is_test)
    .bind(submitted_at)
    .bind(source_key)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

async fn insert_answer(pool: &PgPool, response_id: Uuid, question_id: &str, value: &Value) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO survey_stats.answers (id, response_id, question_id, value)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (response_id, question_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(response_id)
    .bind(question_id)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

/// Loads a small demo data set covering both cohort halves of one course,
/// a second round, and a handful of test responses.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let surveys = [
        ("BS Advanced feedback (odd)", 2025, 1, "BS Advanced (odd group)"),
        ("BS Advanced feedback (even)", 2025, 1, "BS Advanced (even group)"),
        ("Cloud Ops feedback", 2025, 2, "Cloud Ops 3rd-1"),
    ];

    let responses: [(&str, usize, bool, [Value; 4]); 7] = [
        ("seed-001", 0, false, [json!(9), json!(10), json!(5), json!("More hands-on labs")]),
        ("seed-002", 0, false, [json!("8"), json!(9), json!(4), json!("")]),
        ("seed-003", 1, false, [json!(7), json!(8), json!({"value": 4, "label": "Agree"}), json!("Slower pace please")]),
        ("seed-004", 1, true, [json!(2), json!(3), json!(1), json!("test entry")]),
        ("seed-005", 2, false, [json!(6), json!(7), json!(3), json!("More labs")]),
        ("seed-006", 2, false, [json!("NaN"), json!(9), json!(5), json!(null)]),
        ("seed-007", 2, true, [json!(10), json!(10), json!(5), json!("")]),
    ];

    let mut survey_ids = Vec::with_capacity(surveys.len());
    for (title, year, round, course) in surveys {
        let survey_id = upsert_survey(pool, title, year, round, Some(course)).await?;
        for question in &SEED_QUESTIONS {
            upsert_question(
                pool,
                survey_id,
                question.id,
                question.text,
                question.question_type,
                question.category,
                Some(question.order_index),
            )
            .await?;
        }
        survey_ids.push(survey_id);
    }

    let submitted_on = NaiveDate::from_ymd_opt(2025, 3, 14).context("invalid date")?;
    for (source_key, survey_index, is_test, values) in responses {
        let response_id =
            upsert_response(pool, survey_ids[survey_index], source_key, is_test, start_of_day(submitted_on)).await?;
        for (question, value) in SEED_QUESTIONS.iter().zip(values.iter()) {
            insert_answer(pool, response_id, question.id, value).await?;
        }
    }

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    survey_title: String,
    education_year: i32,
    education_round: i32,
    course_name: Option<String>,
    response_key: String,
    is_test: Option<String>,
    submitted_on: Option<NaiveDate>,
    question_id: String,
    question_text: String,
    question_type: String,
    satisfaction_category: Option<String>,
    order_index: Option<String>,
    value: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ImportedAnswer {
    survey_title: String,
    education_year: i32,
    education_round: i32,
    course_name: Option<String>,
    response_key: String,
    is_test: bool,
    submitted_at: Option<DateTime<Utc>>,
    question_id: String,
    question_text: String,
    question_type: QuestionType,
    category: Option<SatisfactionCategory>,
    order_index: Option<i32>,
    value: Value,
}

impl CsvRow {
    /// Loose flag and ordering columns go through the sanitizer; only an
    /// unknown question type rejects the row.
    fn resolve(self, line: usize) -> anyhow::Result<ImportedAnswer> {
        let question_type = QuestionType::parse(&self.question_type).with_context(|| {
            format!("row {line}: unknown question type '{}'", self.question_type)
        })?;
        let is_test = self
            .is_test
            .map(|flag| sanitize::to_boolean(&Value::String(flag)))
            .unwrap_or(false);
        let order_index = self
            .order_index
            .and_then(|index| sanitize::to_integer(&Value::String(index)))
            .and_then(|index| i32::try_from(index).ok());
        let value = serde_json::from_str::<Value>(&self.value).unwrap_or(Value::String(self.value));

        Ok(ImportedAnswer {
            survey_title: self.survey_title,
            education_year: self.education_year,
            education_round: self.education_round,
            course_name: self.course_name,
            response_key: self.response_key,
            is_test,
            submitted_at: self.submitted_on.and_then(start_of_day),
            question_id: self.question_id,
            question_text: self.question_text,
            question_type,
            category: self
                .satisfaction_category
                .as_deref()
                .and_then(SatisfactionCategory::parse),
            order_index,
            value,
        })
    }
}

/// Imports one answer per CSV row. Returns the number of answers inserted;
/// rows already present (same response key and question) are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?.resolve(line + 1)?;

        let survey_id = upsert_survey(
            pool,
            &row.survey_title,
            row.education_year,
            row.education_round,
            row.course_name.as_deref(),
        )
        .await?;
        upsert_question(
            pool,
            survey_id,
            &row.question_id,
            &row.question_text,
            row.question_type,
            row.category,
            row.order_index,
        )
        .await?;
        let response_id =
            upsert_response(pool, survey_id, &row.response_key, row.is_test, row.submitted_at).await?;

        if insert_answer(pool, response_id, &row.question_id, &row.value).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
