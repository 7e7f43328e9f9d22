use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sporting contest's current state as reported by the remote API.
///
/// Constructed fresh on each decode and superseded wholesale by the next
/// successful fetch; there is no incremental merge. Fields use the wire's
/// camelCase names so a decoded event re-encodes to the same JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    /// Unique within one payload
    pub id: String,
    pub name: String,
    /// ISO-8601 start time as sent by the API
    pub date: String,
    pub competitions: Vec<Competition>,
}

impl ScoreEvent {
    /// Parse `date` into a UTC timestamp. The API usually sends
    /// minute-precision ISO-8601 ("2024-01-01T18:00Z"); full RFC 3339 is
    /// accepted too. Returns `None` for anything else.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.date)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%dT%H:%M%Z")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }
}

/// One contest inside an event. Two competitors by convention, home first
/// by position, not by a guaranteed tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub competitors: Vec<Competitor>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<Venue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcasts: Option<Vec<Broadcast>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tickets: Option<Vec<Ticket>>,
}

impl Competition {
    /// Home side by position (first competitor), if present.
    pub fn home(&self) -> Option<&Competitor> {
        self.competitors.first()
    }

    /// Away side by position (second competitor), if present.
    pub fn away(&self) -> Option<&Competitor> {
        self.competitors.get(1)
    }
}

/// One team's participation in a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub team: Team,
    /// The API sends scores as strings; absent pre-game
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A win-loss style record line, e.g. type "total", summary "10-4".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub record_type: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "type")]
    pub status_type: StatusType,
    /// Display clock like "5:42", absent outside live play
    #[serde(rename = "displayClock", skip_serializing_if = "Option::is_none")]
    pub clock: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusType {
    /// Human-readable state, e.g. "Final", "In Progress"
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indoor: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Where a competition is televised, e.g. market "national", names ["ESPN"].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

/// A ticket offer. Identity is the `href`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub summary: String,
    pub href: String,
}
