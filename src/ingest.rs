//! Folds raw answer rows into per-record real/test partitions.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use crate::distribution::RatingDistribution;
use crate::metrics::{InstructorStatsRecord, StatsPartition};
use crate::models::RawAnswerRow;
use crate::question::{
    compare_display_order, DistinctAnswers, QuestionStat, QuestionType, SatisfactionCategory,
};
use crate::sanitize::AnswerValue;
use crate::weighted::WeightedMean;

/// Five-point scale answers are stretched onto the 0..10 rating scale here
/// and nowhere else.
pub const SCALE_TO_RATING_FACTOR: f64 = 2.0;

const RATING_MIN: f64 = 0.0;
const RATING_MAX: f64 = 10.0;

/// Resolves a row's payload once, normalising numeric answers onto the
/// rating scale. Numbers that land off the scale become `Unknown`.
pub fn resolve_answer(row: &RawAnswerRow) -> AnswerValue {
    match AnswerValue::classify(row.question_type, &row.value) {
        AnswerValue::Numeric(value) => {
            let value = if row.question_type == QuestionType::Scale {
                value * SCALE_TO_RATING_FACTOR
            } else {
                value
            };
            if (RATING_MIN..=RATING_MAX).contains(&value) {
                AnswerValue::Numeric(value)
            } else {
                AnswerValue::Unknown
            }
        }
        other => other,
    }
}

#[derive(Default)]
struct QuestionBuilder {
    stat: QuestionStat,
    mean: WeightedMean,
    text: DistinctAnswers,
}

#[derive(Default)]
struct PartitionBuilder {
    responses: HashSet<Uuid>,
    surveys: HashSet<Uuid>,
    active_surveys: HashSet<Uuid>,
    course: WeightedMean,
    instructor: WeightedMean,
    operation: WeightedMean,
    overall: WeightedMean,
    distribution: RatingDistribution,
    questions: HashMap<String, QuestionBuilder>,
    text_responses: DistinctAnswers,
    text_response_count: u64,
}

impl PartitionBuilder {
    fn absorb(&mut self, row: &RawAnswerRow) -> bool {
        self.responses.insert(row.response_id);
        self.surveys.insert(row.survey_id);
        if row.survey_active {
            self.active_surveys.insert(row.survey_id);
        }

        let answer = resolve_answer(row);
        if answer == AnswerValue::Unknown {
            return false;
        }

        let question = self.questions.entry(row.question_id.clone()).or_insert_with(|| {
            QuestionBuilder {
                stat: QuestionStat {
                    question_id: row.question_id.clone(),
                    question_text: row.question_text.clone(),
                    question_type: Some(row.question_type),
                    satisfaction_category: row.satisfaction_category,
                    order_index: row.order_index,
                    ..QuestionStat::default()
                },
                ..QuestionBuilder::default()
            }
        });
        question.stat.total_answers += 1;

        match &answer {
            AnswerValue::Numeric(value) => {
                question.mean.push(Some(*value), 1.0);
                question.stat.distribution.record(*value);
                self.distribution.record(*value);
                self.overall.push(Some(*value), 1.0);
                match row.satisfaction_category {
                    Some(SatisfactionCategory::Course) => self.course.push(Some(*value), 1.0),
                    Some(SatisfactionCategory::Instructor) => self.instructor.push(Some(*value), 1.0),
                    Some(SatisfactionCategory::Operation) => self.operation.push(Some(*value), 1.0),
                    None => false,
                };
            }
            AnswerValue::Text(text) => {
                let text = vec![text.clone()];
                question.text.extend(&text);
                self.text_responses.extend(&text);
                self.text_response_count += 1;
            }
            AnswerValue::Choice(_) | AnswerValue::Unknown => {}
        }
        true
    }

    fn finish(self) -> StatsPartition {
        let mut question_stats: Vec<QuestionStat> = self
            .questions
            .into_values()
            .map(|builder| QuestionStat {
                average: builder.mean.value(),
                text_answers: builder.text.into_vec(),
                ..builder.stat
            })
            .collect();
        question_stats.sort_by(|a, b| {
            compare_display_order(a.order_index, &a.question_text, b.order_index, &b.question_text)
        });

        StatsPartition {
            response_count: self.responses.len() as u64,
            survey_count: self.surveys.len() as u64,
            active_survey_count: self.active_surveys.len() as u64,
            avg_course: self.course.value(),
            avg_instructor: self.instructor.value(),
            avg_operation: self.operation.value(),
            avg_overall: self.overall.value(),
            distribution: self.distribution,
            question_stats,
            text_responses: self.text_responses.into_vec(),
            text_response_count: self.text_response_count,
        }
    }
}

type RecordKey = (i32, i32, Option<String>);

/// Builds one [`InstructorStatsRecord`] per (year, round, course name),
/// ordered by year, round and course.
pub fn build_records(rows: &[RawAnswerRow]) -> Vec<InstructorStatsRecord> {
    let mut partitions: BTreeMap<RecordKey, (PartitionBuilder, PartitionBuilder)> = BTreeMap::new();
    let mut discarded = 0usize;

    for row in rows {
        let course = row
            .course_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let (real, test) = partitions
            .entry((row.education_year, row.education_round, course))
            .or_default();
        let builder = if row.is_test { test } else { real };
        if !builder.absorb(row) {
            discarded += 1;
        }
    }

    if discarded > 0 {
        debug!(discarded, "skipped answers without a usable value");
    }

    partitions
        .into_iter()
        .map(|((year, round, course_name), (real, test))| InstructorStatsRecord {
            education_year: year,
            education_round: round,
            course_name,
            real: real.finish(),
            test: test.finish(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn row(response: u128, question_type: QuestionType, value: Value) -> RawAnswerRow {
        RawAnswerRow {
            survey_id: Uuid::from_u128(1),
            response_id: Uuid::from_u128(response),
            education_year: 2025,
            education_round: 1,
            course_name: Some("BS Advanced".to_string()),
            survey_active: true,
            is_test: false,
            question_id: format!("{}-q", question_type.as_str()),
            question_text: format!("{} question", question_type.as_str()),
            question_type,
            satisfaction_category: Some(SatisfactionCategory::Course),
            order_index: Some(1),
            value,
        }
    }

    #[test]
    fn scale_answers_are_doubled_once() {
        let answer = resolve_answer(&row(1, QuestionType::Scale, json!("4")));
        assert_eq!(answer, AnswerValue::Numeric(8.0));
        let answer = resolve_answer(&row(1, QuestionType::Rating, json!(4)));
        assert_eq!(answer, AnswerValue::Numeric(4.0));
        let answer = resolve_answer(&row(1, QuestionType::Scale, json!(6)));
        assert_eq!(answer, AnswerValue::Unknown);
    }

    #[test]
    fn splits_real_and_test_partitions() {
        let mut test_row = row(3, QuestionType::Rating, json!(2));
        test_row.is_test = true;
        let rows = vec![
            row(1, QuestionType::Rating, json!(8)),
            row(2, QuestionType::Rating, json!("10")),
            row(2, QuestionType::Text, json!("  more labs ")),
            test_row,
        ];

        let records = build_records(&rows);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.real.response_count, 2);
        assert_eq!(record.real.survey_count, 1);
        assert_eq!(record.real.active_survey_count, 1);
        assert_eq!(record.real.avg_overall, Some(9.0));
        assert_eq!(record.real.avg_course, Some(9.0));
        assert_eq!(record.real.avg_instructor, None);
        assert_eq!(record.real.distribution.total(), 2);
        assert_eq!(record.real.text_responses, vec!["more labs"]);
        assert_eq!(record.real.text_response_count, 1);
        assert_eq!(record.real.question_stats.len(), 2);
        assert_eq!(record.test.response_count, 1);
        assert_eq!(record.test.avg_overall, Some(2.0));
    }

    #[test]
    fn malformed_values_count_the_response_but_not_the_answer() {
        let rows = vec![
            row(1, QuestionType::Rating, json!("NaN")),
            row(2, QuestionType::Rating, json!({"value": "7", "label": "Good"})),
        ];
        let records = build_records(&rows);
        let real = &records[0].real;
        assert_eq!(real.response_count, 2);
        assert_eq!(real.question_stats[0].total_answers, 1);
        assert_eq!(real.question_stats[0].average, Some(7.0));
    }

    #[test]
    fn records_are_grouped_and_ordered_by_identity() {
        let mut late = row(1, QuestionType::Rating, json!(5));
        late.education_round = 2;
        let mut other_course = row(2, QuestionType::Rating, json!(5));
        other_course.course_name = Some("Cloud Ops".to_string());
        let mut blank_course = row(3, QuestionType::Rating, json!(5));
        blank_course.course_name = Some("   ".to_string());

        let records = build_records(&[late, other_course, row(4, QuestionType::Rating, json!(5)), blank_course]);
        let keys: Vec<(i32, Option<&str>)> = records
            .iter()
            .map(|r| (r.education_round, r.course_name.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![(1, None), (1, Some("BS Advanced")), (1, Some("Cloud Ops")), (2, Some("BS Advanced"))]
        );
    }
}
