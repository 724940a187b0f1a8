//! Per-question statistics and their merge across partitions.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::distribution::RatingDistribution;
use crate::weighted::WeightedMean;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Rating,
    Scale,
    Choice,
    Text,
}

impl QuestionType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rating" => Some(Self::Rating),
            "scale" => Some(Self::Scale),
            "choice" | "single_choice" | "multiple_choice" => Some(Self::Choice),
            "text" | "textarea" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::Scale => "scale",
            Self::Choice => "choice",
            Self::Text => "text",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Rating | Self::Scale)
    }
}

/// Which aspect of a course a rating question measures. Questions without
/// one carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatisfactionCategory {
    #[serde(alias = "subject")]
    Course,
    Instructor,
    Operation,
}

impl SatisfactionCategory {
    /// `none`, blanks and unknown labels all map to `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "course" | "subject" => Some(Self::Course),
            "instructor" => Some(Self::Instructor),
            "operation" => Some(Self::Operation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Instructor => "instructor",
            Self::Operation => "operation",
        }
    }
}

/// Aggregate for one question within one data partition.
///
/// `total_answers` counts every contributing answer whatever its type;
/// `average` is `None` exactly when no numeric answer contributed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionStat {
    pub question_id: String,
    pub question_text: String,
    pub question_type: Option<QuestionType>,
    pub satisfaction_category: Option<SatisfactionCategory>,
    pub order_index: Option<i32>,
    pub total_answers: u64,
    pub average: Option<f64>,
    pub distribution: RatingDistribution,
    pub text_answers: Vec<String>,
}

impl QuestionStat {
    /// Stable identity used when merging. Legacy rows without an id fall
    /// back to text + type + category.
    pub fn merge_key(&self) -> String {
        let id = self.question_id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
        format!(
            "{}|{}|{}",
            self.question_text.trim(),
            self.question_type.map(|t| t.as_str()).unwrap_or(""),
            self.satisfaction_category.map(|c| c.as_str()).unwrap_or("")
        )
    }

    pub fn is_trivial(&self) -> bool {
        self.total_answers == 0 && self.distribution.is_empty() && self.text_answers.is_empty()
    }
}

/// Orders by `order_index` ascending with unordered questions last, then by
/// display text.
pub fn compare_display_order(
    left_index: Option<i32>,
    left_text: &str,
    right_index: Option<i32>,
    right_text: &str,
) -> Ordering {
    let by_index = match (left_index, right_index) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_index.then_with(|| left_text.cmp(right_text))
}

/// Order-preserving set of distinct answers.
#[derive(Debug, Default, Clone)]
pub struct DistinctAnswers {
    seen: HashSet<String>,
    answers: Vec<String>,
}

impl DistinctAnswers {
    pub fn extend<'a, I: IntoIterator<Item = &'a String>>(&mut self, answers: I) {
        for answer in answers {
            let trimmed = answer.trim();
            if trimmed.is_empty() {
                continue;
            }
            if self.seen.insert(trimmed.to_string()) {
                self.answers.push(trimmed.to_string());
            }
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.answers
    }
}

#[derive(Debug, Default)]
struct QuestionAccumulator {
    question_id: String,
    question_text: String,
    question_type: Option<QuestionType>,
    satisfaction_category: Option<SatisfactionCategory>,
    order_index: Option<i32>,
    total_answers: u64,
    mean: WeightedMean,
    distribution: RatingDistribution,
    text_answers: DistinctAnswers,
}

impl QuestionAccumulator {
    fn absorb(&mut self, stat: &QuestionStat) {
        if self.question_id.is_empty() && !stat.question_id.trim().is_empty() {
            self.question_id = stat.question_id.trim().to_string();
        }
        if self.question_text.is_empty() && !stat.question_text.trim().is_empty() {
            self.question_text = stat.question_text.trim().to_string();
        }
        self.question_type = self.question_type.or(stat.question_type);
        self.satisfaction_category = self.satisfaction_category.or(stat.satisfaction_category);
        self.order_index = match (self.order_index, stat.order_index) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        self.total_answers += stat.total_answers;
        self.mean.push(stat.average, stat.total_answers as f64);
        self.distribution.merge(&stat.distribution);
        self.text_answers.extend(&stat.text_answers);
    }

    fn finish(self) -> QuestionStat {
        QuestionStat {
            question_id: self.question_id,
            question_text: self.question_text,
            question_type: self.question_type,
            satisfaction_category: self.satisfaction_category,
            order_index: self.order_index,
            total_answers: self.total_answers,
            average: self.mean.value(),
            distribution: self.distribution,
            text_answers: self.text_answers.into_vec(),
        }
    }
}

/// Merges any number of per-partition question lists into one list keyed by
/// question identity.
///
/// Counts and distributions are summed, averages are weighted by each
/// partition's `total_answers`, and free-text answers are unioned. The first
/// non-empty text/type/category wins and the smallest `order_index` wins.
pub fn merge_question_stats<'a, I>(sources: I) -> Vec<QuestionStat>
where
    I: IntoIterator<Item = &'a [QuestionStat]>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut accumulators: Vec<QuestionAccumulator> = Vec::new();

    for stats in sources {
        for stat in stats {
            let slot = *index.entry(stat.merge_key()).or_insert_with(|| {
                accumulators.push(QuestionAccumulator::default());
                accumulators.len() - 1
            });
            accumulators[slot].absorb(stat);
        }
    }

    let mut merged: Vec<QuestionStat> = accumulators
        .into_iter()
        .map(QuestionAccumulator::finish)
        .collect();
    merged.sort_by(|a, b| {
        compare_display_order(a.order_index, &a.question_text, b.order_index, &b.question_text)
    });
    merged
}
