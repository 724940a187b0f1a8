//! Markdown rendering of the dashboard rollups.

use std::fmt::Write;

use crate::rollup::{CategoryInsight, CourseBreakdownItem, QuestionInsights, RatingBucket, Summary, TrendPoint};

fn average_label(average: Option<f64>) -> String {
    match average {
        Some(avg) => format!("{avg:.2}"),
        None => "insufficient data".to_string(),
    }
}

fn percent_label(percent: Option<i64>) -> String {
    match percent {
        Some(value) => format!("{value}%"),
        None => "n/a".to_string(),
    }
}

fn write_category(output: &mut String, title: &str, insight: &CategoryInsight) {
    let _ = writeln!(
        output,
        "### {} (avg {}, {} answers)",
        title,
        average_label(insight.average),
        insight.total_answers
    );
    if insight.questions.is_empty() {
        let _ = writeln!(output, "No questions in this category.");
        return;
    }
    for question in &insight.questions {
        let _ = writeln!(
            output,
            "- {}: {} across {} answers",
            question.question_text,
            average_label(question.average),
            question.total_answers
        );
    }
}

pub fn build_report(
    scope: Option<&str>,
    include_test_data: bool,
    summary: &Summary,
    trends: &[TrendPoint],
    courses: &[CourseBreakdownItem],
    buckets: &[RatingBucket],
    insights: &QuestionInsights,
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all education rounds");

    let _ = writeln!(output, "# Survey Satisfaction Report");
    let _ = writeln!(output, "Generated for {scope_label}");
    if summary.includes_test_data {
        let _ = writeln!(output);
        let _ = writeln!(output, "> Figures include test responses.");
    } else if include_test_data {
        let _ = writeln!(output);
        let _ = writeln!(output, "> Test responses were requested but none were recorded.");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(
        output,
        "- {} responses across {} surveys ({} active)",
        summary.total_responses, summary.total_surveys, summary.total_active_surveys
    );
    let _ = writeln!(output, "- {} responses per survey on average", summary.avg_responses_per_survey);
    let _ = writeln!(
        output,
        "- Overall satisfaction {} ({})",
        average_label(summary.avg_overall),
        percent_label(summary.satisfaction_percentage)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Satisfaction Trend");
    if trends.is_empty() {
        let _ = writeln!(output, "No responses recorded for this scope.");
    } else {
        for point in trends {
            let _ = writeln!(
                output,
                "- {}: {} from {} responses ({} courses)",
                point.label,
                percent_label(point.satisfaction),
                point.response_count,
                point.courses.len()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");
    if courses.is_empty() {
        let _ = writeln!(output, "No named courses in this scope.");
    } else {
        for course in courses {
            let _ = writeln!(
                output,
                "- {}: {} from {} responses in {} surveys",
                course.course_name,
                average_label(course.average),
                course.response_count,
                course.survey_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rating Distribution");
    for bucket in buckets {
        let _ = writeln!(output, "- {}: {} ({}%)", bucket.label, bucket.count, bucket.percentage);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Question Insights");
    write_category(&mut output, "Subject", &insights.subject);
    write_category(&mut output, "Instructor", &insights.instructor);
    write_category(&mut output, "Operation", &insights.operation);

    output
}
