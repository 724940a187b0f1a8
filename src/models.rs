//! Row shapes read from storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::question::{QuestionType, SatisfactionCategory};

/// One respondent's answer to one question, joined with the identity of the
/// survey it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAnswerRow {
    pub survey_id: Uuid,
    pub response_id: Uuid,
    pub education_year: i32,
    pub education_round: i32,
    pub course_name: Option<String>,
    pub survey_active: bool,
    pub is_test: bool,
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    pub satisfaction_category: Option<SatisfactionCategory>,
    pub order_index: Option<i32>,
    pub value: Value,
}

/// A submitted response as listed on the survey detail screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRow {
    pub response_id: Uuid,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_test: bool,
    pub answer_count: u64,
    pub avg_rating: Option<f64>,
}

/// One free-text answer with enough question metadata to group it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnswer {
    pub response_id: Uuid,
    pub question_id: String,
    pub question_text: String,
    pub order_index: Option<i32>,
    pub answer: String,
}

/// Survey-level headline numbers returned alongside every detail page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveySummary {
    pub survey_id: Option<Uuid>,
    pub title: Option<String>,
    pub course_name: Option<String>,
    pub total_responses: u64,
    pub test_responses: u64,
    pub avg_course: Option<f64>,
    pub avg_instructor: Option<f64>,
    pub avg_operation: Option<f64>,
    pub avg_overall: Option<f64>,
}
