//! Seams to the remote data source. The engine only relies on the shapes
//! declared here, never on a transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SourceResult;
use crate::metrics::InstructorStatsRecord;
use crate::models::{ResponseRow, SurveySummary, TextAnswer};
use crate::paging::{PagedResult, Track};
use crate::question::QuestionStat;

/// Filters for the bulk, non-paged aggregate path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsFilter {
    pub education_year: Option<i32>,
    pub education_round: Option<i32>,
    pub course_name: Option<String>,
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_records(&self, filter: &StatsFilter) -> SourceResult<Vec<InstructorStatsRecord>>;
}

#[async_trait]
impl<T: StatsSource + ?Sized> StatsSource for Arc<T> {
    async fn fetch_records(&self, filter: &StatsFilter) -> SourceResult<Vec<InstructorStatsRecord>> {
        (**self).fetch_records(filter).await
    }
}

/// Per-track values for one detail round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackValues {
    pub responses: u64,
    pub distributions: u64,
    pub text_answers: u64,
}

impl TrackValues {
    pub fn get(&self, track: Track) -> u64 {
        match track {
            Track::Responses => self.responses,
            Track::Distributions => self.distributions,
            Track::TextAnswers => self.text_answers,
        }
    }

    /// Copy with every track other than `track` zeroed.
    pub fn only(&self, track: Track) -> Self {
        let mut only = TrackValues::default();
        only.set(track, self.get(track));
        only
    }

    pub fn set(&mut self, track: Track, value: u64) {
        match track {
            Track::Responses => self.responses = value,
            Track::Distributions => self.distributions = value,
            Track::TextAnswers => self.text_answers = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRequest {
    pub survey_id: Uuid,
    pub include_test_data: bool,
    pub cursors: TrackValues,
    /// A zero limit asks the source to skip that track.
    pub limits: TrackValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailPage {
    pub summary: SurveySummary,
    pub responses: PagedResult<ResponseRow>,
    pub distributions: PagedResult<QuestionStat>,
    pub text_answers: PagedResult<TextAnswer>,
}

#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, request: &DetailRequest) -> SourceResult<DetailPage>;
}

#[async_trait]
impl<T: DetailSource + ?Sized> DetailSource for Arc<T> {
    async fn fetch_detail(&self, request: &DetailRequest) -> SourceResult<DetailPage> {
        (**self).fetch_detail(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_keeps_the_requested_track() {
        let limits = TrackValues {
            responses: 20,
            distributions: 10,
            text_answers: 50,
        };
        assert_eq!(
            limits.only(Track::Distributions),
            TrackValues {
                responses: 0,
                distributions: 10,
                text_answers: 0,
            }
        );
        assert_eq!(limits.get(Track::TextAnswers), 50);
    }
}
