//! Cursor pagination and the incremental survey detail fetcher.
//!
//! The fetcher keeps three independent tracks (responses, per-question
//! distributions, free-text answers). Each track has its own cursor and
//! in-flight flag, so at most one request per track is outstanding while
//! different tracks may load concurrently. Every request captures the
//! fetcher's generation; a response that comes back after the survey changed
//! or the state was replaced is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ResponseRow, SurveySummary, TextAnswer};
use crate::question::{compare_display_order, QuestionStat};
use crate::source::{DetailRequest, DetailSource, TrackValues};

/// One page of a server-ordered collection. `next_cursor == None` is the
/// only end-of-data signal; cursors are server offsets and opaque to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<u64>,
    pub total_count: u64,
}

impl<T> PagedResult<T> {
    /// Page of `items` read at offset `cursor` out of `total_count` rows.
    pub fn from_window(items: Vec<T>, cursor: u64, total_count: u64) -> Self {
        let next = cursor + items.len() as u64;
        let next_cursor = (!items.is_empty() && next < total_count).then_some(next);
        Self {
            items,
            next_cursor,
            total_count,
        }
    }

    /// Empty page for a skipped track; the requested cursor is echoed back.
    pub fn skipped(cursor: u64, total_count: u64) -> Self {
        Self {
            items: Vec::new(),
            next_cursor: (cursor < total_count).then_some(cursor),
            total_count,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

impl<T: Clone> PagedResult<T> {
    /// Pages through an in-memory collection.
    pub fn slice(all: &[T], cursor: u64, limit: u64) -> Self {
        let total = all.len() as u64;
        if limit == 0 {
            return Self::skipped(cursor, total);
        }
        let start = cursor.min(total) as usize;
        let end = cursor.saturating_add(limit).min(total) as usize;
        Self::from_window(all[start..end].to_vec(), cursor, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Track {
    Responses,
    Distributions,
    TextAnswers,
}

impl Track {
    pub const ALL: [Track; 3] = [Track::Responses, Track::Distributions, Track::TextAnswers];
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Track::Responses => "responses",
            Track::Distributions => "distributions",
            Track::TextAnswers => "text_answers",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchPhase {
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Error,
}

/// What a fetch call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing was requested (no survey, exhausted track, or already loading).
    Skipped,
    Applied,
    /// The response arrived for a superseded identity and was dropped.
    Discarded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackState<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<u64>,
    pub total_count: u64,
    pub loading: bool,
}

impl<T> Default for TrackState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            total_count: 0,
            loading: false,
        }
    }
}

impl<T> TrackState<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    fn replace(&mut self, page: PagedResult<T>) {
        self.items = page.items;
        self.next_cursor = page.next_cursor;
        self.total_count = page.total_count;
    }

    fn append(&mut self, page: PagedResult<T>) {
        self.items.extend(page.items);
        self.next_cursor = page.next_cursor;
        self.total_count = page.total_count;
    }
}

/// Free-text answers of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnswerGroup {
    pub question_id: String,
    pub question_text: String,
    pub order_index: Option<i32>,
    pub answers: Vec<String>,
}

/// Groups flat answers by question, ordered by `order_index` (unordered
/// last) and then question text.
pub fn group_text_answers(answers: &[TextAnswer]) -> Vec<TextAnswerGroup> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<TextAnswerGroup> = Vec::new();
    for answer in answers {
        let slot = *index.entry(answer.question_id.as_str()).or_insert_with(|| {
            groups.push(TextAnswerGroup {
                question_id: answer.question_id.clone(),
                question_text: answer.question_text.clone(),
                order_index: answer.order_index,
                answers: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].answers.push(answer.answer.clone());
    }
    groups.sort_by(|a, b| {
        compare_display_order(a.order_index, &a.question_text, b.order_index, &b.question_text)
    });
    groups
}

/// Read-only copy of the fetcher state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailSnapshot {
    pub survey_id: Option<Uuid>,
    pub phase: FetchPhase,
    pub error: Option<String>,
    pub summary: Option<SurveySummary>,
    pub responses: TrackState<ResponseRow>,
    pub distributions: TrackState<QuestionStat>,
    pub text_answers: TrackState<TextAnswer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    LoadingInitial,
    Ready,
    Error,
}

#[derive(Debug, Default)]
struct FetcherState {
    survey_id: Option<Uuid>,
    generation: u64,
    phase: Phase,
    error: Option<String>,
    summary: Option<SurveySummary>,
    responses: TrackState<ResponseRow>,
    distributions: TrackState<QuestionStat>,
    text_answers: TrackState<TextAnswer>,
    text_version: u64,
    grouped_cache: Option<(u64, Vec<TextAnswerGroup>)>,
}

impl FetcherState {
    fn cursor(&self, track: Track) -> Option<u64> {
        match track {
            Track::Responses => self.responses.next_cursor,
            Track::Distributions => self.distributions.next_cursor,
            Track::TextAnswers => self.text_answers.next_cursor,
        }
    }

    fn loading(&self, track: Track) -> bool {
        match track {
            Track::Responses => self.responses.loading,
            Track::Distributions => self.distributions.loading,
            Track::TextAnswers => self.text_answers.loading,
        }
    }

    fn set_loading(&mut self, track: Track, loading: bool) {
        match track {
            Track::Responses => self.responses.loading = loading,
            Track::Distributions => self.distributions.loading = loading,
            Track::TextAnswers => self.text_answers.loading = loading,
        }
    }

    /// Drops all accumulated data and supersedes in-flight requests.
    fn reset(&mut self, survey_id: Option<Uuid>) {
        let generation = self.generation + 1;
        let text_version = self.text_version + 1;
        *self = FetcherState {
            survey_id,
            generation,
            text_version,
            ..FetcherState::default()
        };
    }
}

/// Incrementally loads one survey's detail slices from a [`DetailSource`].
pub struct DetailFetcher<S> {
    source: S,
    include_test_data: bool,
    page_sizes: TrackValues,
    state: Mutex<FetcherState>,
}

impl<S: DetailSource> DetailFetcher<S> {
    pub fn new(source: S, include_test_data: bool, page_sizes: TrackValues) -> Self {
        Self {
            source,
            include_test_data,
            page_sizes,
            state: Mutex::new(FetcherState::default()),
        }
    }

    pub fn for_survey(source: S, survey_id: Uuid, include_test_data: bool, page_sizes: TrackValues) -> Self {
        let fetcher = Self::new(source, include_test_data, page_sizes);
        fetcher.set_survey(Some(survey_id));
        fetcher
    }

    fn lock(&self) -> MutexGuard<'_, FetcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches to another survey (or none). Accumulated pages are dropped
    /// and responses still in flight for the previous survey are ignored.
    pub fn set_survey(&self, survey_id: Option<Uuid>) {
        let mut state = self.lock();
        if state.survey_id == survey_id {
            return;
        }
        state.reset(survey_id);
        debug!(survey_id = ?survey_id, generation = state.generation, "detail fetcher identity changed");
    }

    /// Loads the first page of every track and replaces all accumulated
    /// state on success. On failure the previous data stays in place.
    pub async fn fetch_initial(&self) -> LoadOutcome {
        let (generation, survey_id) = {
            let mut state = self.lock();
            let Some(survey_id) = state.survey_id else {
                return LoadOutcome::Skipped;
            };
            if state.phase == Phase::LoadingInitial {
                return LoadOutcome::Skipped;
            }
            state.generation += 1;
            state.phase = Phase::LoadingInitial;
            for track in Track::ALL {
                state.set_loading(track, true);
            }
            (state.generation, survey_id)
        };

        let request = DetailRequest {
            survey_id,
            include_test_data: self.include_test_data,
            cursors: TrackValues::default(),
            limits: self.page_sizes,
        };
        let result = self.source.fetch_detail(&request).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(%survey_id, generation, "discarding stale initial detail page");
            return LoadOutcome::Discarded;
        }
        for track in Track::ALL {
            state.set_loading(track, false);
        }
        match result {
            Ok(page) => {
                state.summary = Some(page.summary);
                state.responses.replace(page.responses);
                state.distributions.replace(page.distributions);
                state.text_answers.replace(page.text_answers);
                state.text_version += 1;
                state.error = None;
                state.phase = Phase::Ready;
                info!(
                    %survey_id,
                    responses = state.responses.total_count,
                    questions = state.distributions.total_count,
                    text_answers = state.text_answers.total_count,
                    "loaded survey detail"
                );
                LoadOutcome::Applied
            }
            Err(err) => {
                warn!(%survey_id, error = %err, "initial detail fetch failed");
                state.error = Some(format!("Failed to load survey detail: {err}"));
                state.phase = Phase::Error;
                LoadOutcome::Failed
            }
        }
    }

    /// Appends the next page of `track`. A no-op when the track is
    /// exhausted, already loading, or nothing has been loaded yet.
    pub async fn load_more(&self, track: Track) -> LoadOutcome {
        let (generation, survey_id, cursor) = {
            let mut state = self.lock();
            let Some(survey_id) = state.survey_id else {
                return LoadOutcome::Skipped;
            };
            if !matches!(state.phase, Phase::Ready | Phase::Error) || state.loading(track) {
                return LoadOutcome::Skipped;
            }
            let Some(cursor) = state.cursor(track) else {
                return LoadOutcome::Skipped;
            };
            state.set_loading(track, true);
            (state.generation, survey_id, cursor)
        };

        let mut cursors = TrackValues::default();
        cursors.set(track, cursor);
        let request = DetailRequest {
            survey_id,
            include_test_data: self.include_test_data,
            cursors,
            limits: self.page_sizes.only(track),
        };
        debug!(%survey_id, %track, cursor, "requesting next detail page");
        let result = self.source.fetch_detail(&request).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(%survey_id, %track, generation, "discarding stale detail page");
            return LoadOutcome::Discarded;
        }
        state.set_loading(track, false);
        match result {
            Ok(page) => {
                state.summary = Some(page.summary);
                match track {
                    Track::Responses => state.responses.append(page.responses),
                    Track::Distributions => state.distributions.append(page.distributions),
                    Track::TextAnswers => {
                        state.text_answers.append(page.text_answers);
                        state.text_version += 1;
                    }
                }
                LoadOutcome::Applied
            }
            Err(err) => {
                warn!(%survey_id, %track, error = %err, "detail page fetch failed");
                state.error = Some(format!("Failed to load more {track}: {err}"));
                state.phase = Phase::Error;
                LoadOutcome::Failed
            }
        }
    }

    /// Drops everything for the current survey and loads it again.
    pub async fn refresh(&self) -> LoadOutcome {
        {
            let mut state = self.lock();
            let survey_id = state.survey_id;
            state.reset(survey_id);
        }
        self.fetch_initial().await
    }

    pub fn phase(&self) -> FetchPhase {
        let state = self.lock();
        phase_of(&state)
    }

    pub fn has_more(&self, track: Track) -> bool {
        self.lock().cursor(track).is_some()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn summary(&self) -> Option<SurveySummary> {
        self.lock().summary.clone()
    }

    pub fn snapshot(&self) -> DetailSnapshot {
        let state = self.lock();
        DetailSnapshot {
            survey_id: state.survey_id,
            phase: phase_of(&state),
            error: state.error.clone(),
            summary: state.summary.clone(),
            responses: state.responses.clone(),
            distributions: state.distributions.clone(),
            text_answers: state.text_answers.clone(),
        }
    }

    /// Text answers grouped by question. Recomputed only after the text
    /// track changed.
    pub fn grouped_text_answers(&self) -> Vec<TextAnswerGroup> {
        let mut state = self.lock();
        let version = state.text_version;
        if let Some((cached_version, groups)) = &state.grouped_cache {
            if *cached_version == version {
                return groups.clone();
            }
        }
        let groups = group_text_answers(&state.text_answers.items);
        state.grouped_cache = Some((version, groups.clone()));
        groups
    }
}

fn phase_of(state: &FetcherState) -> FetchPhase {
    match state.phase {
        Phase::Idle => FetchPhase::Idle,
        Phase::LoadingInitial => FetchPhase::LoadingInitial,
        Phase::Error => FetchPhase::Error,
        Phase::Ready if Track::ALL.iter().any(|track| state.loading(*track)) => FetchPhase::LoadingMore,
        Phase::Ready => FetchPhase::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, SourceResult};
    use crate::source::DetailPage;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedSource {
        responses: Vec<ResponseRow>,
        distributions: Vec<QuestionStat>,
        text_answers: Vec<TextAnswer>,
        calls: AtomicUsize,
        failing: Mutex<HashSet<Track>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn new(responses: usize, questions: usize, texts: usize) -> Self {
            Self {
                responses: (0..responses)
                    .map(|i| ResponseRow {
                        response_id: Uuid::from_u128(i as u128),
                        submitted_at: None,
                        is_test: false,
                        answer_count: 3,
                        avg_rating: Some(8.0),
                    })
                    .collect(),
                distributions: (0..questions)
                    .map(|i| QuestionStat {
                        question_id: format!("q{i}"),
                        question_text: format!("Question {i}"),
                        order_index: Some(i as i32),
                        ..QuestionStat::default()
                    })
                    .collect(),
                text_answers: (0..texts)
                    .map(|i| TextAnswer {
                        response_id: Uuid::from_u128(i as u128),
                        question_id: format!("t{}", i % 2),
                        question_text: format!("Comment {}", i % 2),
                        order_index: if i % 2 == 0 { None } else { Some(1) },
                        answer: format!("answer {i}"),
                    })
                    .collect(),
                ..Self::default()
            }
        }

        fn fail(&self, track: Track) {
            self.failing.lock().unwrap().insert(track);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DetailSource for ScriptedSource {
        async fn fetch_detail(&self, request: &DetailRequest) -> SourceResult<DetailPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let failing = Track::ALL
                .into_iter()
                .any(|track| request.limits.get(track) > 0 && self.failing.lock().unwrap().contains(&track));
            if failing {
                return Err(SourceError::unavailable("connection reset"));
            }
            Ok(DetailPage {
                summary: SurveySummary {
                    survey_id: Some(request.survey_id),
                    total_responses: self.responses.len() as u64,
                    ..SurveySummary::default()
                },
                responses: PagedResult::slice(&self.responses, request.cursors.responses, request.limits.responses),
                distributions: PagedResult::slice(
                    &self.distributions,
                    request.cursors.distributions,
                    request.limits.distributions,
                ),
                text_answers: PagedResult::slice(
                    &self.text_answers,
                    request.cursors.text_answers,
                    request.limits.text_answers,
                ),
            })
        }
    }

    fn sizes() -> TrackValues {
        TrackValues {
            responses: 2,
            distributions: 2,
            text_answers: 3,
        }
    }

    #[test]
    fn slices_report_exhaustion_with_a_null_cursor() {
        let all: Vec<u32> = (0..5).collect();
        let first = PagedResult::slice(&all, 0, 2);
        assert_eq!(first.items, vec![0, 1]);
        assert_eq!(first.next_cursor, Some(2));
        let last = PagedResult::slice(&all, 4, 2);
        assert_eq!(last.items, vec![4]);
        assert!(last.is_last());
        let skipped = PagedResult::slice(&all, 2, 0);
        assert!(skipped.items.is_empty());
        assert_eq!(skipped.next_cursor, Some(2));
        let beyond = PagedResult::slice(&all, 9, 2);
        assert!(beyond.items.is_empty() && beyond.is_last());
    }

    #[tokio::test]
    async fn initial_fetch_loads_all_tracks() {
        let fetcher = DetailFetcher::for_survey(ScriptedSource::new(5, 3, 4), Uuid::from_u128(7), false, sizes());
        assert_eq!(fetcher.phase(), FetchPhase::Idle);
        assert_eq!(fetcher.fetch_initial().await, LoadOutcome::Applied);

        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.phase, FetchPhase::Ready);
        assert_eq!(snapshot.responses.items.len(), 2);
        assert_eq!(snapshot.responses.total_count, 5);
        assert_eq!(snapshot.distributions.items.len(), 2);
        assert_eq!(snapshot.text_answers.items.len(), 3);
        assert_eq!(snapshot.summary.unwrap().total_responses, 5);
        assert!(fetcher.has_more(Track::Responses));
    }

    #[tokio::test]
    async fn load_more_appends_until_exhausted() {
        let fetcher = DetailFetcher::for_survey(ScriptedSource::new(5, 3, 4), Uuid::from_u128(7), false, sizes());
        fetcher.fetch_initial().await;

        assert_eq!(fetcher.load_more(Track::Responses).await, LoadOutcome::Applied);
        assert_eq!(fetcher.load_more(Track::Responses).await, LoadOutcome::Applied);
        assert!(!fetcher.has_more(Track::Responses));
        assert_eq!(fetcher.load_more(Track::Responses).await, LoadOutcome::Skipped);

        let snapshot = fetcher.snapshot();
        let ids: Vec<Uuid> = snapshot.responses.items.iter().map(|r| r.response_id).collect();
        assert_eq!(ids, (0..5).map(Uuid::from_u128).collect::<Vec<_>>());
        assert_eq!(snapshot.distributions.items.len(), 2);
        assert_eq!(fetcher.source.calls(), 3);
    }

    #[tokio::test]
    async fn duplicate_load_more_issues_a_single_request() {
        let gate = Arc::new(Notify::new());
        let gated = Arc::new(ScriptedSource {
            gate: Some(gate.clone()),
            ..ScriptedSource::new(5, 3, 4)
        });
        let fetcher = DetailFetcher::for_survey(gated.clone(), Uuid::from_u128(7), false, sizes());
        let initial = fetcher.fetch_initial();
        let release = async {
            gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(initial, release);
        assert_eq!(outcome, LoadOutcome::Applied);

        let first = fetcher.load_more(Track::Responses);
        let second = async {
            let outcome = fetcher.load_more(Track::Responses).await;
            assert_eq!(fetcher.phase(), FetchPhase::LoadingMore);
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, LoadOutcome::Applied);
        assert_eq!(second, LoadOutcome::Skipped);
        assert_eq!(gated.calls(), 2);
        assert_eq!(fetcher.snapshot().responses.items.len(), 4);
    }

    #[tokio::test]
    async fn load_more_on_different_tracks_runs_concurrently() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource {
            gate: Some(gate.clone()),
            ..ScriptedSource::new(5, 3, 4)
        });
        let fetcher = DetailFetcher::for_survey(source.clone(), Uuid::from_u128(7), false, sizes());
        gate.notify_one();
        assert_eq!(fetcher.fetch_initial().await, LoadOutcome::Applied);

        let responses = fetcher.load_more(Track::Responses);
        let texts = fetcher.load_more(Track::TextAnswers);
        let release = async {
            while source.calls() < 3 {
                tokio::task::yield_now().await;
            }
            let snapshot = fetcher.snapshot();
            assert_eq!(snapshot.phase, FetchPhase::LoadingMore);
            assert!(snapshot.responses.loading && snapshot.text_answers.loading);
            assert!(!snapshot.distributions.loading);
            gate.notify_waiters();
        };
        let (responses, texts, ()) = tokio::join!(responses, texts, release);

        assert_eq!(responses, LoadOutcome::Applied);
        assert_eq!(texts, LoadOutcome::Applied);
        assert_eq!(source.calls(), 3);
        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.phase, FetchPhase::Ready);
        assert_eq!(snapshot.responses.items.len(), 4);
        assert_eq!(snapshot.text_answers.items.len(), 4);
        assert!(snapshot.text_answers.next_cursor.is_none());
        assert_eq!(snapshot.distributions.items.len(), 2);
    }

    #[tokio::test]
    async fn load_more_for_a_previous_survey_is_discarded() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource {
            gate: Some(gate.clone()),
            ..ScriptedSource::new(5, 3, 4)
        });
        let fetcher = DetailFetcher::for_survey(source.clone(), Uuid::from_u128(1), false, sizes());
        gate.notify_one();
        assert_eq!(fetcher.fetch_initial().await, LoadOutcome::Applied);

        let stale = fetcher.load_more(Track::Responses);
        let switch = async {
            while source.calls() < 2 {
                tokio::task::yield_now().await;
            }
            fetcher.set_survey(Some(Uuid::from_u128(2)));
            let release = async {
                while source.calls() < 3 {
                    tokio::task::yield_now().await;
                }
                gate.notify_waiters();
            };
            let (fresh, ()) = tokio::join!(fetcher.fetch_initial(), release);
            fresh
        };
        let (stale, fresh) = tokio::join!(stale, switch);

        assert_eq!(stale, LoadOutcome::Discarded);
        assert_eq!(fresh, LoadOutcome::Applied);
        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.survey_id, Some(Uuid::from_u128(2)));
        assert_eq!(snapshot.phase, FetchPhase::Ready);
        assert_eq!(snapshot.summary.unwrap().survey_id, Some(Uuid::from_u128(2)));
        assert_eq!(snapshot.responses.items.len(), 2);
        assert_eq!(snapshot.responses.next_cursor, Some(2));
        assert!(!snapshot.responses.loading);
    }

    #[tokio::test]
    async fn failed_load_more_keeps_accumulated_data() {
        let source = Arc::new(ScriptedSource::new(5, 5, 4));
        let fetcher = DetailFetcher::for_survey(source.clone(), Uuid::from_u128(7), false, sizes());
        fetcher.fetch_initial().await;
        fetcher.load_more(Track::Responses).await;

        source.fail(Track::Distributions);
        assert_eq!(fetcher.load_more(Track::Distributions).await, LoadOutcome::Failed);

        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.phase, FetchPhase::Error);
        assert!(snapshot.error.unwrap().contains("connection reset"));
        assert_eq!(snapshot.distributions.items.len(), 2);
        assert_eq!(snapshot.distributions.next_cursor, Some(2));
        assert!(!snapshot.distributions.loading);
        assert_eq!(snapshot.responses.items.len(), 4);
        assert_eq!(snapshot.text_answers.items.len(), 3);
    }

    #[tokio::test]
    async fn refresh_recovers_from_error() {
        let source = Arc::new(ScriptedSource::new(3, 1, 1));
        source.fail(Track::Responses);
        let fetcher = DetailFetcher::for_survey(source.clone(), Uuid::from_u128(7), false, sizes());
        assert_eq!(fetcher.fetch_initial().await, LoadOutcome::Failed);
        assert_eq!(fetcher.phase(), FetchPhase::Error);

        source.failing.lock().unwrap().clear();
        assert_eq!(fetcher.refresh().await, LoadOutcome::Applied);
        assert_eq!(fetcher.phase(), FetchPhase::Ready);
        assert_eq!(fetcher.error(), None);
        assert_eq!(fetcher.snapshot().responses.items.len(), 2);
    }

    #[tokio::test]
    async fn responses_for_a_previous_survey_are_discarded() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource {
            gate: Some(gate.clone()),
            ..ScriptedSource::new(5, 3, 4)
        });
        let fetcher = DetailFetcher::for_survey(source.clone(), Uuid::from_u128(1), false, sizes());

        let initial = fetcher.fetch_initial();
        let switch = async {
            fetcher.set_survey(Some(Uuid::from_u128(2)));
            gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(initial, switch);
        assert_eq!(outcome, LoadOutcome::Discarded);

        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.survey_id, Some(Uuid::from_u128(2)));
        assert_eq!(snapshot.phase, FetchPhase::Idle);
        assert!(snapshot.responses.items.is_empty());
        assert!(snapshot.summary.is_none());
    }

    #[tokio::test]
    async fn grouped_text_answers_follow_question_order() {
        let fetcher = DetailFetcher::for_survey(ScriptedSource::new(1, 1, 4), Uuid::from_u128(7), false, sizes());
        fetcher.fetch_initial().await;

        let groups = fetcher.grouped_text_answers();
        let ids: Vec<&str> = groups.iter().map(|g| g.question_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t0"]);
        assert_eq!(groups[1].answers, vec!["answer 0", "answer 2"]);

        fetcher.load_more(Track::TextAnswers).await;
        let groups = fetcher.grouped_text_answers();
        assert_eq!(groups[0].answers, vec!["answer 1", "answer 3"]);
        assert_eq!(fetcher.grouped_text_answers(), groups);
    }

    #[tokio::test]
    async fn load_more_before_initial_fetch_is_a_no_op() {
        let fetcher = DetailFetcher::for_survey(ScriptedSource::new(5, 3, 4), Uuid::from_u128(7), false, sizes());
        assert_eq!(fetcher.load_more(Track::Responses).await, LoadOutcome::Skipped);
        assert_eq!(fetcher.source.calls(), 0);

        let detached = DetailFetcher::new(ScriptedSource::new(1, 1, 1), false, sizes());
        assert_eq!(detached.fetch_initial().await, LoadOutcome::Skipped);
    }
}
