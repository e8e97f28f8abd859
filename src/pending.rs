use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of records captured offline and uploaded later.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PendingKind {
    DamageAssessment,
    RatTrap,
    Rodenticide,
    IrrigationReading,
    MachineryUsage,
    Rainfall,
    /// Supply requisition ("vale de salida"), uploaded with its detail lines.
    Voucher,
}

/// What happens to a local row once the server accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    Delete,
    /// Keep the row for history, flagged as synced.
    MarkSynced,
}

impl PendingKind {
    pub const ALL: [PendingKind; 7] = [
        PendingKind::DamageAssessment,
        PendingKind::RatTrap,
        PendingKind::Rodenticide,
        PendingKind::IrrigationReading,
        PendingKind::MachineryUsage,
        PendingKind::Rainfall,
        PendingKind::Voucher,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            PendingKind::DamageAssessment => "damage assessment",
            PendingKind::RatTrap => "rat trap",
            PendingKind::Rodenticide => "rodenticide",
            PendingKind::IrrigationReading => "irrigation reading",
            PendingKind::MachineryUsage => "machinery usage",
            PendingKind::Rainfall => "rainfall",
            PendingKind::Voucher => "voucher",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            PendingKind::DamageAssessment => "damage_assessment",
            PendingKind::RatTrap => "rat_trap",
            PendingKind::Rodenticide => "rodenticide",
            PendingKind::IrrigationReading => "irrigation_reading",
            PendingKind::MachineryUsage => "machinery_usage",
            PendingKind::Rainfall => "rainfall",
            PendingKind::Voucher => "voucher",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == slug)
    }

    pub fn commit_policy(self) -> CommitPolicy {
        match self {
            PendingKind::Voucher => CommitPolicy::MarkSynced,
            _ => CommitPolicy::Delete,
        }
    }

    /// The remote payload needs the child lines stored next to the header.
    pub fn has_detail_lines(self) -> bool {
        matches!(self, PendingKind::Voucher)
    }
}

/// Upload state persisted with every pending row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingState {
    Pending,
    Submitting,
    Failed(String),
    Synced,
}

impl PendingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingState::Pending => "pending",
            PendingState::Submitting => "submitting",
            PendingState::Failed(_) => "failed",
            PendingState::Synced => "synced",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PendingState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Rebuild from the stored `state` and `failure_reason` columns.
    pub fn from_columns(state: &str, reason: Option<String>) -> Self {
        match state {
            "submitting" => PendingState::Submitting,
            "failed" => PendingState::Failed(reason.unwrap_or_default()),
            "synced" => PendingState::Synced,
            _ => PendingState::Pending,
        }
    }

    /// Part of the upload backlog.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PendingState::Pending | PendingState::Failed(_))
    }
}

/// A record as captured in the field, before it gets a local id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPendingRecord {
    pub kind: PendingKind,
    pub inspector_id: Option<i64>,
    pub field_id: Option<i64>,
    pub season_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub payload: Value,
}

impl NewPendingRecord {
    pub fn new(kind: PendingKind, payload: Value) -> Self {
        Self {
            kind,
            inspector_id: None,
            field_id: None,
            season_id: None,
            latitude: None,
            longitude: None,
            captured_at: Utc::now(),
            payload,
        }
    }

    pub fn with_refs(mut self, inspector_id: i64, field_id: i64, season_id: i64) -> Self {
        self.inspector_id = Some(inspector_id);
        self.field_id = Some(field_id);
        self.season_id = Some(season_id);
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }
}

/// A stored record waiting for (or done with) upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRecord {
    pub local_id: i64,
    pub kind: PendingKind,
    pub inspector_id: Option<i64>,
    pub field_id: Option<i64>,
    pub season_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub payload: Value,
    pub state: PendingState,
}

/// Detail line of a voucher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoucherLine {
    pub article_id: i64,
    pub quantity: f64,
    pub unit: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Body sent to the server for one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub kind: PendingKind,
    pub local_id: i64,
    pub inspector_id: Option<i64>,
    pub field_id: Option<i64>,
    pub season_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub captured_at: DateTime<Utc>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<VoucherLine>>,
}

impl Submission {
    pub fn from_record(record: &PendingRecord, lines: Option<Vec<VoucherLine>>) -> Self {
        let location = match (record.latitude, record.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            kind: record.kind,
            local_id: record.local_id,
            inspector_id: record.inspector_id,
            field_id: record.field_id,
            season_id: record.season_id,
            location,
            captured_at: record.captured_at,
            data: record.payload.clone(),
            lines,
        }
    }
}

/// The server's verdict on a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    #[serde(alias = "Success")]
    pub success: bool,
    #[serde(alias = "Message", default)]
    pub message: String,
}

impl SubmitResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
