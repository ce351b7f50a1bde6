//! Free-text search over events and groups.
//!
//! The same query fans out to an event search and a group search that run
//! concurrently. Each side first matches on its full field set; if that query
//! fails it is retried once on a reduced set so a broken column degrades
//! results instead of failing the page.

pub mod query;

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use gather_db::Database;
use gather_db::search::{EventField, GroupField, GroupHit, LikePattern};
use gather_types::api::{
    EventSummary, GroupSummary, SearchQuery, SearchResults, Suggestion, SuggestionKind,
};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub use query::SearchTerm;

pub const SEARCH_LIMIT: usize = 24;
pub const SUGGESTIONS_PER_KIND: usize = 5;
pub const SUGGESTIONS_TOTAL: usize = 10;

const EVENT_FIELDS: &[EventField] = &[EventField::Title, EventField::Address, EventField::LocationName];
const EVENT_FALLBACK_FIELDS: &[EventField] = &[EventField::Title];
const GROUP_FIELDS: &[GroupField] = &[GroupField::Name, GroupField::Description, GroupField::City];
const GROUP_FALLBACK_FIELDS: &[GroupField] = &[GroupField::Name];

/// Backend the aggregator queries. Implemented by [`Database`].
pub trait SearchSource: Send + Sync + 'static {
    fn events(
        &self,
        pattern: &LikePattern,
        fields: &[EventField],
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<EventSummary>>;

    fn groups(
        &self,
        pattern: &LikePattern,
        fields: &[GroupField],
        limit: usize,
    ) -> anyhow::Result<Vec<GroupHit>>;
}

impl SearchSource for Database {
    fn events(
        &self,
        pattern: &LikePattern,
        fields: &[EventField],
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<EventSummary>> {
        self.search_events(pattern, fields, now, limit)
    }

    fn groups(
        &self,
        pattern: &LikePattern,
        fields: &[GroupField],
        limit: usize,
    ) -> anyhow::Result<Vec<GroupHit>> {
        self.search_groups(pattern, fields, limit)
    }
}

/// Distinct members, plus the organizer when they are not listed as one.
pub fn member_count(member_ids: &[Uuid], organizer_id: Uuid) -> u32 {
    let distinct: HashSet<&Uuid> = member_ids.iter().collect();
    let organizer = u32::from(!distinct.contains(&organizer_id));
    distinct.len() as u32 + organizer
}

fn summarize(hit: GroupHit) -> GroupSummary {
    GroupSummary {
        member_count: member_count(&hit.member_ids, hit.organizer_id),
        id: hit.id,
        name: hit.name,
        description: hit.description,
        city: hit.city,
    }
}

pub struct SearchAggregator<S> {
    source: Arc<S>,
}

impl<S: SearchSource> SearchAggregator<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub async fn search_events(&self, raw: &str) -> Result<Vec<EventSummary>, ApiError> {
        match SearchTerm::parse(raw) {
            Some(term) => self.events(&term, SEARCH_LIMIT).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn search_groups(&self, raw: &str) -> Result<Vec<GroupSummary>, ApiError> {
        match SearchTerm::parse(raw) {
            Some(term) => self.groups(&term, SEARCH_LIMIT).await,
            None => Ok(Vec::new()),
        }
    }

    /// Both searches, run concurrently.
    pub async fn search(&self, raw: &str) -> Result<SearchResults, ApiError> {
        let Some(term) = SearchTerm::parse(raw) else {
            return Ok(SearchResults::default());
        };
        let (events, groups) = tokio::join!(
            self.events(&term, SEARCH_LIMIT),
            self.groups(&term, SEARCH_LIMIT)
        );
        Ok(SearchResults {
            events: events?,
            groups: groups?,
        })
    }

    /// Up to five events then up to five groups.
    pub async fn suggestions(&self, raw: &str) -> Result<Vec<Suggestion>, ApiError> {
        let Some(term) = SearchTerm::parse_for_suggestions(raw) else {
            return Ok(Vec::new());
        };
        let (events, groups) = tokio::join!(
            self.events(&term, SUGGESTIONS_PER_KIND),
            self.groups(&term, SUGGESTIONS_PER_KIND)
        );

        let events = events?.into_iter().map(|e| Suggestion {
            label: e.title,
            kind: SuggestionKind::Event,
            id: e.id.to_string(),
        });
        let groups = groups?.into_iter().map(|g| Suggestion {
            label: g.name,
            kind: SuggestionKind::Group,
            id: g.id.to_string(),
        });
        Ok(events.chain(groups).take(SUGGESTIONS_TOTAL).collect())
    }

    async fn events(&self, term: &SearchTerm, limit: usize) -> Result<Vec<EventSummary>, ApiError> {
        let source = self.source.clone();
        let pattern = term.pattern();
        blocking(move || {
            let now = Utc::now();
            match source.events(&pattern, EVENT_FIELDS, now, limit) {
                Ok(hits) => Ok(hits),
                Err(e) => {
                    warn!("Event search failed, retrying on title only: {:#}", e);
                    Ok(source.events(&pattern, EVENT_FALLBACK_FIELDS, now, limit)?)
                }
            }
        })
        .await
    }

    async fn groups(&self, term: &SearchTerm, limit: usize) -> Result<Vec<GroupSummary>, ApiError> {
        let source = self.source.clone();
        let pattern = term.pattern();
        let hits = blocking(move || match source.groups(&pattern, GROUP_FIELDS, limit) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!("Group search failed, retrying on name only: {:#}", e);
                Ok(source.groups(&pattern, GROUP_FALLBACK_FIELDS, limit)?)
            }
        })
        .await?;
        Ok(hits.into_iter().map(summarize).collect())
    }
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let results = SearchAggregator::new(state.db.clone()).search(&query.q).await?;
    Ok(Json(results))
}

pub async fn suggestions(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let suggestions = SearchAggregator::new(state.db.clone())
        .suggestions(&query.q)
        .await?;
    Ok(Json(suggestions))
}
