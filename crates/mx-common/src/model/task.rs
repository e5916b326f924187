use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;

pub const PDF_MIME: &str = "application/pdf";

/// Header carrying the bearer credential used to authenticate upstream calls.
pub const ACCESS_TOKEN_HEADER: &str = "x-webitel-access";

/// Inbound request headers snapshotted into the task at admission time so
/// background workers can authenticate upstream calls after the originating
/// request context is gone.
pub const CARRIED_HEADERS: [&str; 3] = ["authorization", "x-req-id", ACCESS_TOKEN_HEADER];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Pdf,
    /// Reserved, not implemented.
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportChannel {
    Screenrecording,
    Call,
}

impl ExportChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportChannel::Screenrecording => "screenrecording",
            ExportChannel::Call => "call",
        }
    }

    /// Short prefix used in task id fingerprints.
    pub fn prefix(&self) -> &'static str {
        match self {
            ExportChannel::Screenrecording => "ss",
            ExportChannel::Call => "vc",
        }
    }
}

impl fmt::Display for ExportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The job persisted in the Redis queue. Must stay JSON-serializable: a
/// worker in a different process rehydrates it after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTask {
    pub task_id: String,
    #[serde(default)]
    pub agent_id: i64,
    #[serde(default)]
    pub call_id: String,
    pub user_id: i64,
    pub domain_id: i64,
    pub channel: ExportChannel,
    /// Unix millisecond window filtering files by upload date; (0, 0) means
    /// unconstrained.
    pub from: i64,
    pub to: i64,
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub headers: HashMap<String, String>,
    /// Optional explicit file ids restricting the manifest.
    #[serde(default)]
    pub ids: Vec<i64>,
}

impl ExportTask {
    /// The subject this export is about: the agent id on the screen
    /// recording channel, the call id on the call channel.
    pub fn subject(&self) -> String {
        match self.channel {
            ExportChannel::Screenrecording => self.agent_id.to_string(),
            ExportChannel::Call => self.call_id.clone(),
        }
    }

    pub fn validate_subject(&self) -> Result<(), ExportError> {
        match self.channel {
            ExportChannel::Screenrecording if self.agent_id == 0 => Err(
                ExportError::InvalidArgument("agent_id is required".into()),
            ),
            ExportChannel::Call if self.call_id.is_empty() => {
                Err(ExportError::InvalidArgument("call_id is required".into()))
            }
            _ => Ok(()),
        }
    }

    /// Final object name: the task id doubles as the file name stem.
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(channel: ExportChannel, agent_id: i64, call_id: &str) -> ExportTask {
        ExportTask {
            task_id: "pdf_ss_42_2024-05-01_10_20_30".into(),
            agent_id,
            call_id: call_id.into(),
            user_id: 1,
            domain_id: 1,
            channel,
            from: 0,
            to: 0,
            export_type: ExportType::Pdf,
            headers: HashMap::new(),
            ids: Vec::new(),
        }
    }

    #[test]
    fn subject_follows_channel() {
        assert_eq!(task(ExportChannel::Screenrecording, 42, "").subject(), "42");
        assert_eq!(task(ExportChannel::Call, 0, "c-77").subject(), "c-77");
    }

    #[test]
    fn subject_invariant_per_channel() {
        assert!(task(ExportChannel::Screenrecording, 42, "").validate_subject().is_ok());
        assert!(task(ExportChannel::Screenrecording, 0, "").validate_subject().is_err());
        assert!(task(ExportChannel::Call, 0, "c-77").validate_subject().is_ok());
        assert!(task(ExportChannel::Call, 0, "").validate_subject().is_err());
    }

    #[test]
    fn channel_and_type_serialize_lowercase() {
        let task = task(ExportChannel::Screenrecording, 42, "");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["channel"], "screenrecording");
        assert_eq!(json["type"], "pdf");
    }

    #[test]
    fn file_name_appends_pdf_extension() {
        let task = task(ExportChannel::Screenrecording, 42, "");
        assert_eq!(task.file_name(), "pdf_ss_42_2024-05-01_10_20_30.pdf");
    }
}
