//! Real and test partitions of one record, and their combination.

use serde::{Deserialize, Serialize};

use crate::distribution::RatingDistribution;
use crate::question::{merge_question_stats, DistinctAnswers, QuestionStat};
use crate::weighted::weighted_average;

/// One real-or-test slice of a record's statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsPartition {
    pub response_count: u64,
    pub survey_count: u64,
    pub active_survey_count: u64,
    pub avg_course: Option<f64>,
    pub avg_instructor: Option<f64>,
    pub avg_operation: Option<f64>,
    pub avg_overall: Option<f64>,
    pub distribution: RatingDistribution,
    pub question_stats: Vec<QuestionStat>,
    pub text_responses: Vec<String>,
    pub text_response_count: u64,
}

impl StatsPartition {
    pub fn has_data(&self) -> bool {
        self.response_count > 0
            || self.survey_count > 0
            || self.active_survey_count > 0
            || self.text_response_count > 0
            || self.question_stats.iter().any(|stat| !stat.is_trivial())
            || !self.text_responses.is_empty()
            || !self.distribution.is_empty()
    }
}

/// Statistics for one (education year, education round, course) triple.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorStatsRecord {
    pub education_year: i32,
    pub education_round: i32,
    pub course_name: Option<String>,
    #[serde(default)]
    pub real: StatsPartition,
    #[serde(default)]
    pub test: StatsPartition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsSource {
    Real,
    Test,
}

/// A record's partitions folded into one view. Recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedMetrics {
    pub education_year: i32,
    pub education_round: i32,
    pub course_name: Option<String>,
    pub response_count: u64,
    pub survey_count: u64,
    pub active_survey_count: u64,
    pub avg_course: Option<f64>,
    pub avg_instructor: Option<f64>,
    pub avg_operation: Option<f64>,
    pub avg_overall: Option<f64>,
    pub distribution: RatingDistribution,
    pub question_stats: Vec<QuestionStat>,
    pub text_responses: Vec<String>,
    pub text_response_count: u64,
    /// `Test` when synthetic responses contributed to the numbers.
    pub source: MetricsSource,
}

impl CombinedMetrics {
    pub fn build(record: &InstructorStatsRecord, include_test_data: bool) -> Self {
        let partitions: Vec<&StatsPartition> = if include_test_data {
            vec![&record.real, &record.test]
        } else {
            vec![&record.real]
        };

        let average_of = |select: fn(&StatsPartition) -> Option<f64>| {
            weighted_average(
                partitions
                    .iter()
                    .map(|partition| (select(partition), partition.response_count as f64)),
            )
        };

        let question_stats =
            merge_question_stats(partitions.iter().map(|partition| partition.question_stats.as_slice()));

        let mut text_responses = DistinctAnswers::default();
        for stat in &question_stats {
            text_responses.extend(&stat.text_answers);
        }
        for partition in &partitions {
            text_responses.extend(&partition.text_responses);
        }

        let source = if include_test_data && record.test.has_data() {
            MetricsSource::Test
        } else {
            MetricsSource::Real
        };

        CombinedMetrics {
            education_year: record.education_year,
            education_round: record.education_round,
            course_name: record.course_name.clone(),
            response_count: partitions.iter().map(|p| p.response_count).sum(),
            survey_count: partitions.iter().map(|p| p.survey_count).sum(),
            active_survey_count: partitions.iter().map(|p| p.active_survey_count).sum(),
            avg_course: average_of(|p| p.avg_course),
            avg_instructor: average_of(|p| p.avg_instructor),
            avg_operation: average_of(|p| p.avg_operation),
            avg_overall: average_of(|p| p.avg_overall),
            distribution: partitions.iter().map(|p| p.distribution).collect(),
            question_stats,
            text_responses: text_responses.into_vec(),
            text_response_count: partitions.iter().map(|p| p.text_response_count).sum(),
            source,
        }
    }
}

/// Maps every record through [`CombinedMetrics::build`] with one fixed
/// `include_test_data` flag.
pub fn combine_all(records: &[InstructorStatsRecord], include_test_data: bool) -> Vec<CombinedMetrics> {
    records
        .iter()
        .map(|record| CombinedMetrics::build(record, include_test_data))
        .collect()
}
