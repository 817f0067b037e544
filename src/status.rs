use chrono::NaiveDateTime;
use serde::Serialize;

/// Overall presence for a student on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DailyStatus {
    Present,
    Sick,
    Leave,
    Absent,
    Task,
    OffsiteDuty,
    /// A stored value no alias recognizes. Never written through the IPC surface.
    Unknown(String),
}

impl DailyStatus {
    /// Single canonicalization point for daily status strings, including the
    /// short codes and local-language names older records were written with.
    pub fn canonicalize(raw: &str) -> Self {
        let t = raw.trim();
        match t.to_ascii_lowercase().as_str() {
            "present" | "h" | "hadir" => Self::Present,
            "sick" | "s" | "sakit" => Self::Sick,
            "leave" | "i" | "izin" => Self::Leave,
            "absent" | "a" | "alpha" | "alpa" => Self::Absent,
            "task" | "tugas" => Self::Task,
            "offsite_duty" | "offsiteduty" | "dl" | "dinas luar" => Self::OffsiteDuty,
            _ => Self::Unknown(t.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Present => "present",
            Self::Sick => "sick",
            Self::Leave => "leave",
            Self::Absent => "absent",
            Self::Task => "task",
            Self::OffsiteDuty => "offsite_duty",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl Serialize for DailyStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Present,
    Sick,
    Leave,
    Absent,
    OnTask,
    Substituted,
    /// No daily record yet for the student on that date.
    Pending,
}

impl SubjectStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "sick" => Some(Self::Sick),
            "leave" => Some(Self::Leave),
            "absent" => Some(Self::Absent),
            "on_task" | "ontask" => Some(Self::OnTask),
            "substituted" => Some(Self::Substituted),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Sick => "sick",
            Self::Leave => "leave",
            Self::Absent => "absent",
            Self::OnTask => "on_task",
            Self::Substituted => "substituted",
            Self::Pending => "pending",
        }
    }
}

/// Default subject-level status for a daily status. `None` means the student
/// has no daily record for the date.
pub fn map_daily_to_subject(daily: Option<&DailyStatus>) -> SubjectStatus {
    match daily {
        Some(DailyStatus::Present) => SubjectStatus::Present,
        Some(DailyStatus::Leave) => SubjectStatus::Leave,
        Some(DailyStatus::Sick) => SubjectStatus::Sick,
        Some(DailyStatus::Absent) => SubjectStatus::Absent,
        Some(DailyStatus::Task) | Some(DailyStatus::OffsiteDuty) => SubjectStatus::OnTask,
        Some(DailyStatus::Unknown(_)) | None => SubjectStatus::Pending,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInMethod {
    Geo,
    Manual,
}

impl CheckInMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "geo" => Some(Self::Geo),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geo => "geo",
            Self::Manual => "manual",
        }
    }
}

/// Where a subject attendance value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Follows the daily record; the synchronizer keeps it up to date.
    Derived,
    /// Entered by a teacher; the synchronizer leaves it alone.
    Manual { by: String, at: NaiveDateTime },
}

impl Provenance {
    pub fn is_overridden(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Derived => "derived",
            Self::Manual { .. } => "manual",
        }
    }

    /// Rebuilds the tagged value from its stored columns. Returns `None` when the
    /// columns disagree with each other.
    pub fn from_columns(
        is_overridden: bool,
        source: &str,
        by: Option<String>,
        at: Option<NaiveDateTime>,
    ) -> Option<Self> {
        match (is_overridden, source, by, at) {
            (false, "derived", None, None) => Some(Self::Derived),
            (true, "manual", Some(by), Some(at)) => Some(Self::Manual { by, at }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_canonicalize_to_one_variant() {
        assert_eq!(DailyStatus::canonicalize("Hadir"), DailyStatus::Present);
        assert_eq!(DailyStatus::canonicalize(" sakit "), DailyStatus::Sick);
        assert_eq!(DailyStatus::canonicalize("Izin"), DailyStatus::Leave);
        assert_eq!(DailyStatus::canonicalize("Alpha"), DailyStatus::Absent);
        assert_eq!(DailyStatus::canonicalize("Tugas"), DailyStatus::Task);
        assert_eq!(DailyStatus::canonicalize("DL"), DailyStatus::OffsiteDuty);
        assert_eq!(
            DailyStatus::canonicalize("Terlambat"),
            DailyStatus::Unknown("Terlambat".to_string())
        );
    }

    #[test]
    fn mapping_table() {
        use DailyStatus as D;
        use SubjectStatus as S;
        assert_eq!(map_daily_to_subject(Some(&D::Present)), S::Present);
        assert_eq!(map_daily_to_subject(Some(&D::Leave)), S::Leave);
        assert_eq!(map_daily_to_subject(Some(&D::Sick)), S::Sick);
        assert_eq!(map_daily_to_subject(Some(&D::Absent)), S::Absent);
        assert_eq!(map_daily_to_subject(Some(&D::Task)), S::OnTask);
        assert_eq!(map_daily_to_subject(Some(&D::OffsiteDuty)), S::OnTask);
        assert_eq!(map_daily_to_subject(None), S::Pending);
        assert_eq!(
            map_daily_to_subject(Some(&D::Unknown("x".into()))),
            S::Pending
        );
    }

    #[test]
    fn provenance_columns_must_agree() {
        let at = crate::clock::parse_datetime("2026-03-02T08:00:00").expect("dt");
        assert_eq!(
            Provenance::from_columns(false, "derived", None, None),
            Some(Provenance::Derived)
        );
        assert_eq!(
            Provenance::from_columns(true, "manual", Some("t1".into()), Some(at)),
            Some(Provenance::Manual {
                by: "t1".into(),
                at
            })
        );
        assert_eq!(Provenance::from_columns(true, "derived", None, None), None);
        assert_eq!(
            Provenance::from_columns(false, "derived", Some("t1".into()), None),
            None
        );
    }
}
