use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use survey_satisfaction_stats::config::{self, AppConfig};
use survey_satisfaction_stats::db::{self, PgSource};
use survey_satisfaction_stats::metrics::combine_all;
use survey_satisfaction_stats::paging::{DetailFetcher, FetchPhase, Track};
use survey_satisfaction_stats::report;
use survey_satisfaction_stats::rollup::{
    build_course_breakdown, build_question_insights, build_rating_buckets, build_summary,
    build_trend_series,
};
use survey_satisfaction_stats::source::{StatsFilter, StatsSource};

#[derive(Parser)]
#[command(name = "survey-stats")]
#[command(about = "Satisfaction statistics for course surveys", long_about = None)]
struct Cli {
    /// TOML configuration file, layered under SURVEY_STATS_* variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct Scope {
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    round: Option<i32>,
    #[arg(long)]
    course: Option<String>,
    /// Fold test responses into every figure
    #[arg(long)]
    include_test_data: bool,
}

impl Scope {
    fn filter(&self) -> StatsFilter {
        StatsFilter {
            education_year: self.year,
            education_round: self.round,
            course_name: self.course.clone(),
        }
    }

    fn label(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(year) = self.year {
            parts.push(year.to_string());
        }
        if let Some(round) = self.round {
            parts.push(format!("round {round}"));
        }
        if let Some(course) = &self.course {
            parts.push(course.clone());
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo surveys with real and test responses
    Seed,
    /// Import answers from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print headline satisfaction numbers
    Summary {
        #[command(flatten)]
        scope: Scope,
        /// Emit every rollup as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "survey-report.md")]
        out: PathBuf,
    },
    /// Page through one survey's responses, questions and comments
    Detail {
        #[arg(long)]
        survey_id: Uuid,
        /// Number of pages to load per track
        #[arg(long, default_value_t = 1)]
        pages: usize,
        #[arg(long)]
        include_test_data: bool,
        #[arg(long)]
        json: bool,
    },
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let database_url = config.database_url()?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    let pool = connect(&config).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} answers from {}.", csv.display());
        }
        Commands::Summary { scope, json } => {
            let include_test_data = scope.include_test_data || config.include_test_data;
            let records = PgSource::new(pool)
                .fetch_records(&scope.filter())
                .await
                .context("failed to load survey statistics")?;
            let metrics = combine_all(&records, include_test_data);
            let summary = build_summary(&metrics);

            if json {
                let payload = serde_json::json!({
                    "summary": summary,
                    "trend": build_trend_series(&metrics),
                    "courses": build_course_breakdown(&metrics),
                    "ratingBuckets": build_rating_buckets(&metrics),
                    "questionInsights": build_question_insights(&metrics),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            if summary.total_responses == 0 {
                println!("No responses found for this scope.");
                return Ok(());
            }
            println!(
                "{} responses across {} surveys ({} active), {} per survey",
                summary.total_responses,
                summary.total_surveys,
                summary.total_active_surveys,
                summary.avg_responses_per_survey
            );
            match (summary.avg_overall, summary.satisfaction_percentage) {
                (Some(avg), Some(percent)) => println!("Overall satisfaction {avg:.2} ({percent}%)"),
                _ => println!("Overall satisfaction: insufficient data"),
            }
            if summary.includes_test_data {
                println!("Figures include test responses.");
            }
            println!("Top courses:");
            for course in build_course_breakdown(&metrics).iter().take(10) {
                println!(
                    "- {} ({} responses) avg {}",
                    course.course_name,
                    course.response_count,
                    course
                        .average
                        .map(|avg| format!("{avg:.2}"))
                        .unwrap_or_else(|| "n/a".to_string())
                );
            }
        }
        Commands::Report { scope, out } => {
            let include_test_data = scope.include_test_data || config.include_test_data;
            let records = PgSource::new(pool)
                .fetch_records(&scope.filter())
                .await
                .context("failed to load survey statistics")?;
            let metrics = combine_all(&records, include_test_data);
            let label = scope.label();
            let report = report::build_report(
                label.as_deref(),
                include_test_data,
                &build_summary(&metrics),
                &build_trend_series(&metrics),
                &build_course_breakdown(&metrics),
                &build_rating_buckets(&metrics),
                &build_question_insights(&metrics),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Detail {
            survey_id,
            pages,
            include_test_data,
            json,
        } => {
            let fetcher = DetailFetcher::for_survey(
                PgSource::new(pool),
                survey_id,
                include_test_data || config.include_test_data,
                (&config.page_sizes).into(),
            );
            fetcher.fetch_initial().await;
            for _ in 1..pages.max(1) {
                if !Track::ALL.iter().any(|track| fetcher.has_more(*track)) {
                    break;
                }
                tokio::join!(
                    fetcher.load_more(Track::Responses),
                    fetcher.load_more(Track::Distributions),
                    fetcher.load_more(Track::TextAnswers),
                );
            }

            let snapshot = fetcher.snapshot();
            if snapshot.phase == FetchPhase::Error {
                anyhow::bail!(snapshot
                    .error
                    .unwrap_or_else(|| "survey detail failed to load".to_string()));
            }
            info!(%survey_id, phase = ?snapshot.phase, "detail loaded");

            if json {
                let payload = serde_json::json!({
                    "detail": snapshot,
                    "groupedTextAnswers": fetcher.grouped_text_answers(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            if let Some(summary) = &snapshot.summary {
                println!(
                    "{} ({} responses, {} test)",
                    summary.title.as_deref().unwrap_or("untitled survey"),
                    summary.total_responses,
                    summary.test_responses
                );
            }
            println!(
                "Loaded {}/{} responses, {}/{} questions, {}/{} comments.",
                snapshot.responses.items.len(),
                snapshot.responses.total_count,
                snapshot.distributions.items.len(),
                snapshot.distributions.total_count,
                snapshot.text_answers.items.len(),
                snapshot.text_answers.total_count
            );
            for question in &snapshot.distributions.items {
                println!(
                    "- {}: {} answers, avg {}",
                    question.question_text,
                    question.total_answers,
                    question
                        .average
                        .map(|avg| format!("{avg:.2}"))
                        .unwrap_or_else(|| "n/a".to_string())
                );
            }
            for group in fetcher.grouped_text_answers() {
                println!("{}", group.question_text);
                for answer in &group.answers {
                    println!("  - {answer}");
                }
            }
        }
    }

    Ok(())
}
