//! Reducers over a collection of [`CombinedMetrics`].
//!
//! Every function takes the already-combined metrics, so the same records can
//! be rolled up with or without test data by calling
//! [`combine_all`](crate::metrics::combine_all) with a different flag. All
//! averaging goes through [`WeightedMean`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::course::normalize_course_name;
use crate::distribution::RatingDistribution;
use crate::metrics::{CombinedMetrics, MetricsSource};
use crate::question::{merge_question_stats, QuestionStat, QuestionType, SatisfactionCategory};
use crate::weighted::WeightedMean;

/// Upper bound of the satisfaction scale every average is expressed on.
/// Five-point answers are doubled onto this scale at ingestion; changing the
/// scale means changing this constant.
pub const SATISFACTION_SCALE_MAX: f64 = 10.0;

/// `average / SATISFACTION_SCALE_MAX` as a rounded percentage.
pub fn satisfaction_percentage(average: Option<f64>) -> Option<i64> {
    average.map(|avg| (avg * (100.0 / SATISFACTION_SCALE_MAX)).round() as i64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_responses: u64,
    pub total_surveys: u64,
    pub total_active_surveys: u64,
    pub avg_overall: Option<f64>,
    pub avg_responses_per_survey: u64,
    pub satisfaction_percentage: Option<i64>,
    pub includes_test_data: bool,
}

pub fn build_summary(metrics: &[CombinedMetrics]) -> Summary {
    let total_responses: u64 = metrics.iter().map(|m| m.response_count).sum();
    let total_surveys: u64 = metrics.iter().map(|m| m.survey_count).sum();
    let avg_overall = metrics
        .iter()
        .map(|m| (m.avg_overall, m.response_count as f64))
        .collect::<WeightedMean>()
        .value();

    let avg_responses_per_survey = if total_surveys == 0 {
        0
    } else {
        (total_responses as f64 / total_surveys as f64).round() as u64
    };

    Summary {
        total_responses,
        total_surveys,
        total_active_surveys: metrics.iter().map(|m| m.active_survey_count).sum(),
        avg_overall,
        avg_responses_per_survey,
        satisfaction_percentage: satisfaction_percentage(avg_overall),
        includes_test_data: metrics.iter().any(|m| m.source == MetricsSource::Test),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub education_year: i32,
    pub education_round: i32,
    pub label: String,
    pub response_count: u64,
    pub average: Option<f64>,
    pub satisfaction: Option<i64>,
    pub courses: Vec<String>,
}

#[derive(Default)]
struct TrendBucket {
    responses: u64,
    mean: WeightedMean,
    courses: BTreeSet<String>,
}

/// One point per (year, round), ascending by year then round.
pub fn build_trend_series(metrics: &[CombinedMetrics]) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<(i32, i32), TrendBucket> = BTreeMap::new();

    for m in metrics {
        let bucket = buckets
            .entry((m.education_year, m.education_round))
            .or_default();
        bucket.responses += m.response_count;
        bucket.mean.push(m.avg_overall, m.response_count as f64);
        if let Some(course) = normalize_course_name(m.course_name.as_deref()) {
            bucket.courses.insert(course);
        }
    }

    buckets
        .into_iter()
        .map(|((year, round), bucket)| {
            let average = bucket.mean.value();
            TrendPoint {
                education_year: year,
                education_round: round,
                label: format!("{year}-{round}"),
                response_count: bucket.responses,
                average,
                satisfaction: satisfaction_percentage(average),
                courses: bucket.courses.into_iter().collect(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBreakdownItem {
    pub course_name: String,
    pub response_count: u64,
    pub survey_count: u64,
    pub record_count: u64,
    pub average: Option<f64>,
    pub satisfaction: Option<i64>,
}

/// Groups by normalized course name, highest average first.
///
/// Records whose course name normalizes to nothing are left out. Ties keep
/// first-seen order and buckets without an average sort last.
pub fn build_course_breakdown(metrics: &[CombinedMetrics]) -> Vec<CourseBreakdownItem> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, u64, u64, u64, WeightedMean)> = Vec::new();

    for m in metrics {
        let Some(course) = normalize_course_name(m.course_name.as_deref()) else {
            continue;
        };
        let slot = *index.entry(course.clone()).or_insert_with(|| {
            buckets.push((course, 0, 0, 0, WeightedMean::new()));
            buckets.len() - 1
        });
        let bucket = &mut buckets[slot];
        bucket.1 += m.response_count;
        bucket.2 += m.survey_count;
        bucket.3 += 1;
        bucket.4.push(m.avg_overall, m.response_count as f64);
    }

    let mut items: Vec<CourseBreakdownItem> = buckets
        .into_iter()
        .map(|(course_name, responses, surveys, records, mean)| {
            let average = mean.value();
            CourseBreakdownItem {
                course_name,
                response_count: responses,
                survey_count: surveys,
                record_count: records,
                average,
                satisfaction: satisfaction_percentage(average),
            }
        })
        .collect();

    items.sort_by(|a, b| match (a.average, b.average) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    items
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingBucket {
    pub label: String,
    pub min_score: u8,
    pub max_score: u8,
    pub count: u64,
    pub percentage: u32,
}

pub const RATING_BANDS: [(u8, u8); 4] = [(1, 4), (5, 6), (7, 8), (9, 10)];

/// Four fixed bands over the merged distribution. All percentages are zero
/// when nothing was rated.
pub fn build_rating_buckets(metrics: &[CombinedMetrics]) -> Vec<RatingBucket> {
    let merged: RatingDistribution = metrics.iter().map(|m| m.distribution).collect();
    bucketize(&merged)
}

/// Each band is rounded on its own, so the four percentages can land up to
/// two points either side of 100. Counts of 1, 1, 1 and 5 across the bands
/// give 13, 13, 13 and 63, which sum to 102.
pub fn bucketize(distribution: &RatingDistribution) -> Vec<RatingBucket> {
    let total = distribution.total();
    RATING_BANDS
        .iter()
        .map(|&(min_score, max_score)| {
            let count = (min_score..=max_score)
                .map(|score| distribution.get(score))
                .fold(0u64, u64::saturating_add);
            let percentage = if total == 0 {
                0
            } else {
                (count as f64 / total as f64 * 100.0).round() as u32
            };
            RatingBucket {
                label: format!("{min_score}-{max_score}"),
                min_score,
                max_score,
                count,
                percentage,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedQuestion {
    pub question_id: String,
    pub question_text: String,
    pub question_type: Option<QuestionType>,
    pub order_index: Option<i32>,
    pub total_answers: u64,
    pub average: Option<f64>,
    pub satisfaction: Option<i64>,
    pub distribution: RatingDistribution,
    pub text_answers: Vec<String>,
}

impl From<QuestionStat> for AggregatedQuestion {
    fn from(stat: QuestionStat) -> Self {
        AggregatedQuestion {
            satisfaction: satisfaction_percentage(stat.average),
            question_id: stat.question_id,
            question_text: stat.question_text,
            question_type: stat.question_type,
            order_index: stat.order_index,
            total_answers: stat.total_answers,
            average: stat.average,
            distribution: stat.distribution,
            text_answers: stat.text_answers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInsight {
    pub average: Option<f64>,
    pub total_answers: u64,
    pub questions: Vec<AggregatedQuestion>,
}

/// Question statistics split into the three satisfaction buckets. Questions
/// without a category count as `subject`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInsights {
    pub subject: CategoryInsight,
    pub instructor: CategoryInsight,
    pub operation: CategoryInsight,
}

pub fn build_question_insights(metrics: &[CombinedMetrics]) -> QuestionInsights {
    let merged = merge_question_stats(metrics.iter().map(|m| m.question_stats.as_slice()));

    let mut grouped: [(WeightedMean, u64, Vec<AggregatedQuestion>); 3] = Default::default();
    for stat in merged {
        let slot = match stat.satisfaction_category {
            Some(SatisfactionCategory::Instructor) => 1,
            Some(SatisfactionCategory::Operation) => 2,
            Some(SatisfactionCategory::Course) | None => 0,
        };
        let (mean, total, questions) = &mut grouped[slot];
        mean.push(stat.average, stat.total_answers as f64);
        *total += stat.total_answers;
        questions.push(stat.into());
    }

    let [subject, instructor, operation] = grouped.map(|(mean, total_answers, questions)| CategoryInsight {
        average: mean.value(),
        total_answers,
        questions,
    });
    QuestionInsights {
        subject,
        instructor,
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{combine_all, InstructorStatsRecord, StatsPartition};
    use proptest::prelude::*;

    fn record(year: i32, round: i32, course: &str, responses: u64, avg: Option<f64>) -> InstructorStatsRecord {
        InstructorStatsRecord {
            education_year: year,
            education_round: round,
            course_name: Some(course.to_string()),
            real: StatsPartition {
                response_count: responses,
                survey_count: 1,
                active_survey_count: 1,
                avg_overall: avg,
                ..StatsPartition::default()
            },
            test: StatsPartition::default(),
        }
    }

    fn question(id: &str, category: Option<SatisfactionCategory>, total: u64, avg: Option<f64>) -> QuestionStat {
        QuestionStat {
            question_id: id.to_string(),
            question_text: id.to_uppercase(),
            question_type: Some(QuestionType::Rating),
            satisfaction_category: category,
            total_answers: total,
            average: avg,
            ..QuestionStat::default()
        }
    }

    #[test]
    fn summary_weights_overall_average_by_responses() {
        let metrics = combine_all(
            &[
                record(2025, 1, "A", 30, Some(9.0)),
                record(2025, 1, "B", 10, Some(5.0)),
                record(2025, 2, "C", 0, None),
            ],
            false,
        );
        let summary = build_summary(&metrics);
        assert_eq!(summary.total_responses, 40);
        assert_eq!(summary.total_surveys, 3);
        assert_eq!(summary.total_active_surveys, 3);
        assert_eq!(summary.avg_overall, Some(8.0));
        assert_eq!(summary.avg_responses_per_survey, 13);
        assert_eq!(summary.satisfaction_percentage, Some(80));
        assert!(!summary.includes_test_data);
    }

    #[test]
    fn empty_summary_has_no_average() {
        let summary = build_summary(&[]);
        assert_eq!(summary.avg_overall, None);
        assert_eq!(summary.avg_responses_per_survey, 0);
        assert_eq!(summary.satisfaction_percentage, None);
    }

    #[test]
    fn trend_points_are_sorted_and_collect_courses() {
        let metrics = combine_all(
            &[
                record(2025, 2, "Cloud Ops", 10, Some(7.0)),
                record(2024, 3, "Cloud Ops", 10, Some(6.0)),
                record(2025, 1, "BS Advanced (odd group)", 20, Some(9.0)),
                record(2025, 1, "BS Advanced", 20, Some(8.0)),
            ],
            false,
        );
        let trend = build_trend_series(&metrics);
        let keys: Vec<(i32, i32)> = trend.iter().map(|p| (p.education_year, p.education_round)).collect();
        assert_eq!(keys, vec![(2024, 3), (2025, 1), (2025, 2)]);
        assert_eq!(trend[1].response_count, 40);
        assert_eq!(trend[1].average, Some(8.5));
        assert_eq!(trend[1].satisfaction, Some(85));
        assert_eq!(trend[1].courses, vec!["BS Advanced"]);
        assert_eq!(trend[1].label, "2025-1");
    }

    #[test]
    fn cohort_variants_share_a_course_bucket() {
        let metrics = combine_all(
            &[
                record(2025, 1, "BS Advanced (odd group)", 10, Some(6.0)),
                record(2025, 1, "BS Advanced", 30, Some(10.0)),
                record(2025, 1, "Cloud Ops", 5, Some(9.5)),
                record(2025, 1, "  ", 50, Some(1.0)),
            ],
            false,
        );
        let breakdown = build_course_breakdown(&metrics);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].course_name, "Cloud Ops");
        assert_eq!(breakdown[1].course_name, "BS Advanced");
        assert_eq!(breakdown[1].response_count, 40);
        assert_eq!(breakdown[1].survey_count, 2);
        assert_eq!(breakdown[1].record_count, 2);
        assert_eq!(breakdown[1].average, Some(9.0));
    }

    #[test]
    fn courses_without_average_sort_last() {
        let metrics = combine_all(
            &[record(2025, 1, "Empty", 0, None), record(2025, 1, "Rated", 3, Some(2.0))],
            false,
        );
        let breakdown = build_course_breakdown(&metrics);
        assert_eq!(breakdown[0].course_name, "Rated");
        assert_eq!(breakdown[1].average, None);
    }

    #[test]
    fn rating_bands_cover_the_whole_domain() {
        let mut distribution = RatingDistribution::new();
        distribution.add(2, 1);
        distribution.add(6, 1);
        distribution.add(8, 1);
        let buckets = bucketize(&distribution);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["1-4", "5-6", "7-8", "9-10"]);
        let percentages: Vec<u32> = buckets.iter().map(|b| b.percentage).collect();
        assert_eq!(percentages, vec![33, 33, 33, 0]);
    }

    #[test]
    fn empty_distribution_buckets_are_zero() {
        let buckets = build_rating_buckets(&[]);
        assert_eq!(buckets.len(), 4);
        assert!(buckets.iter().all(|b| b.count == 0 && b.percentage == 0));
    }

    #[test]
    fn independent_band_rounding_can_reach_one_hundred_and_two() {
        let mut distribution = RatingDistribution::new();
        distribution.add(1, 1);
        distribution.add(5, 1);
        distribution.add(7, 1);
        distribution.add(9, 5);
        let percentages: Vec<u32> = bucketize(&distribution).iter().map(|b| b.percentage).collect();
        assert_eq!(percentages, vec![13, 13, 13, 63]);
        assert_eq!(percentages.iter().sum::<u32>(), 102);
    }

    #[test]
    fn question_insights_partition_by_category() {
        let mut a = record(2025, 1, "A", 10, Some(8.0));
        a.real.question_stats = vec![
            question("q1", Some(SatisfactionCategory::Course), 10, Some(8.0)),
            question("q2", Some(SatisfactionCategory::Instructor), 10, Some(9.0)),
            question("q4", None, 4, Some(2.0)),
        ];
        let mut b = record(2025, 1, "B", 10, Some(6.0));
        b.real.question_stats = vec![
            question("q1", Some(SatisfactionCategory::Course), 30, Some(4.0)),
            question("q3", Some(SatisfactionCategory::Operation), 5, None),
        ];

        let insights = build_question_insights(&combine_all(&[a, b], false));
        assert_eq!(insights.subject.questions.len(), 2);
        assert_eq!(insights.subject.total_answers, 44);
        let subject_avg = insights.subject.average.unwrap();
        assert!((subject_avg - (5.0 * 40.0 + 2.0 * 4.0) / 44.0).abs() < 1e-9);
        assert_eq!(insights.instructor.average, Some(9.0));
        assert_eq!(insights.instructor.questions[0].satisfaction, Some(90));
        assert_eq!(insights.operation.questions.len(), 1);
        assert_eq!(insights.operation.average, None);
    }

    proptest! {
        #[test]
        fn band_percentages_sum_to_about_one_hundred(
            counts in proptest::collection::vec(0u64..500, 10)
        ) {
            let mut distribution = RatingDistribution::new();
            for (slot, count) in counts.iter().enumerate() {
                distribution.add(slot as u8 + 1, *count);
            }
            let buckets = bucketize(&distribution);
            let sum: u32 = buckets.iter().map(|b| b.percentage).sum();
            if distribution.total() == 0 {
                prop_assert_eq!(sum, 0);
            } else {
                prop_assert!((98..=102).contains(&sum));
            }
        }
    }
}
