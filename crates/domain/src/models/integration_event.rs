//! Integration event domain models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shared::pagination::{PageRequest, Pagination};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::webhook::is_supported_event_type;

/// Public API collections and the entity type each one exposes.
pub const COLLECTIONS: &[(&str, &str)] = &[
    ("incidents", "incident"),
    ("actions", "action"),
    ("inspections", "inspection"),
    ("training", "training"),
    ("risks", "risk"),
    ("chemicals", "chemical"),
    ("users", "user"),
];

/// Maps a public API collection name to its entity type.
pub fn entity_type_for_collection(collection: &str) -> Option<&'static str> {
    COLLECTIONS
        .iter()
        .find(|(name, _)| *name == collection)
        .map(|(_, entity)| *entity)
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    System,
    Api,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::System => "system",
            EventSource::Api => "api",
        }
    }
}

impl FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(EventSource::System),
            "api" => Ok(EventSource::Api),
            _ => Err(format!("Unknown event source: {}", s)),
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for recording a new event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIntegrationEvent {
    pub organisation_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: JsonValue,
    pub source: EventSource,
    pub triggered_by: Option<Uuid>,
}

impl NewIntegrationEvent {
    /// Event produced by the platform itself.
    pub fn system(
        organisation_id: Uuid,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            organisation_id,
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            source: EventSource::System,
            triggered_by: None,
        }
    }

    pub fn triggered_by(mut self, user_id: Uuid) -> Self {
        self.triggered_by = Some(user_id);
        self
    }
}

/// Body of `POST /api/public/v1/events`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordEventRequest {
    #[validate(length(min = 1, max = 100))]
    pub event_type: String,

    #[validate(length(min = 1, max = 50))]
    pub entity_type: String,

    #[validate(length(min = 1, max = 100))]
    pub entity_id: String,

    #[serde(default)]
    pub payload: JsonValue,
}

impl RecordEventRequest {
    pub fn validate_event_type(&self) -> Result<(), String> {
        if is_supported_event_type(&self.event_type) {
            Ok(())
        } else {
            Err(format!("Unsupported event type: {}", self.event_type))
        }
    }
}

/// Integration event as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationEventResponse {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: JsonValue,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListIntegrationEventsQuery {
    pub event_type: Option<String>,
    pub source: Option<EventSource>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListIntegrationEventsQuery {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }
}

/// Filter applied when querying events. All fields are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationEventFilter {
    pub event_type: Option<String>,
    pub source: Option<EventSource>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl IntegrationEventFilter {
    pub fn for_entity_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }
}

impl From<&ListIntegrationEventsQuery> for IntegrationEventFilter {
    fn from(query: &ListIntegrationEventsQuery) -> Self {
        Self {
            event_type: query.event_type.clone(),
            source: query.source,
            entity_type: query.entity_type.clone(),
            entity_id: query.entity_id.clone(),
            start: query.start_date,
            end: query.end_date,
        }
    }
}

/// Response for listing events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListIntegrationEventsResponse {
    pub events: Vec<IntegrationEventResponse>,
    pub pagination: Pagination,
}

/// Query parameters for `events_for_entity`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityEventsQuery {
    pub limit: Option<u32>,
}

impl EntityEventsQuery {
    /// Result cap, 1..=500, default 100.
    pub fn limit(&self) -> i64 {
        i64::from(self.limit.unwrap_or(100).clamp(1, 500))
    }
}

/// Query parameters for event statistics.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventStatsQuery {
    pub days: Option<u32>,
}

impl EventStatsQuery {
    /// Window in days, 1..=365, default 30.
    pub fn days(&self) -> u32 {
        self.days.unwrap_or(30).clamp(1, 365)
    }
}

/// Query parameters for the recent summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSummaryQuery {
    pub hours: Option<u32>,
}

impl EventSummaryQuery {
    /// Window in hours, 1..=720, default 24.
    pub fn hours(&self) -> u32 {
        self.hours.unwrap_or(24).clamp(1, 720)
    }
}

/// Event count for one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

/// Event count for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyEventCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// Aggregate statistics over a window of days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEventStats {
    pub days: u32,
    pub total_events: i64,
    pub entity_types: i64,
    pub active_days: i64,
    /// Top 10 event types by count, descending.
    pub by_event_type: Vec<EventTypeCount>,
    /// Per-day counts, newest first.
    pub by_day: Vec<DailyEventCount>,
}

/// Count and latest occurrence of one event type in a recent window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeSummary {
    pub event_type: String,
    pub count: i64,
    pub latest: DateTime<Utc>,
}

/// Response for the recent summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummaryResponse {
    pub hours: u32,
    pub event_types: Vec<EventTypeSummary>,
}
