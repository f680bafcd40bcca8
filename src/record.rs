use chrono::{NaiveDate, NaiveDateTime, SubsecRound as _, Utc};
use serde::{Deserialize, Serialize};

use crate::refid::RefId;

/// Column format for `dob`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Column format for `submission_date`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Format of the `date` field on a submit receipt, e.g. `Jan 5, 2026 09:30`.
pub const RECEIPT_DATE_FORMAT: &str = "%b %-d, %Y %H:%M";

/// Caller-supplied fields of an application, already validated at the router
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApplication {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub gender: String,
    pub date_of_birth: NaiveDate,
    pub course: String,
    pub session_time: String,
    pub address: String,
}

/// A persisted application. Serialized with the stored column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub ref_id: RefId,
    #[serde(rename = "fullname")]
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub gender: String,
    #[serde(rename = "dob", with = "date_column")]
    pub date_of_birth: NaiveDate,
    pub course: String,
    pub session_time: String,
    pub address: String,
    #[serde(rename = "submission_date", with = "timestamp_column")]
    pub submitted_at: NaiveDateTime,
}

impl ApplicationRecord {
    pub(crate) fn from_new(
        id: i64,
        ref_id: RefId,
        submitted_at: NaiveDateTime,
        fields: NewApplication,
    ) -> Self {
        Self {
            id,
            ref_id,
            full_name: fields.full_name,
            email: fields.email,
            phone: fields.phone,
            gender: fields.gender,
            date_of_birth: fields.date_of_birth,
            course: fields.course,
            session_time: fields.session_time,
            address: fields.address,
            submitted_at,
        }
    }

    pub fn receipt_date(&self) -> String {
        self.submitted_at.format(RECEIPT_DATE_FORMAT).to_string()
    }
}

/// Current UTC time at column precision.
pub(crate) fn now_timestamp() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

mod date_column {
    use chrono::NaiveDate;
    use serde::{Deserialize as _, Deserializer, Serializer};

    use super::DATE_FORMAT;

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}

mod timestamp_column {
    use chrono::NaiveDateTime;
    use serde::{Deserialize as _, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(
        timestamp: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::json;

    use super::{ApplicationRecord, TIMESTAMP_FORMAT};
    use crate::refid::RefId;

    fn sample_record() -> ApplicationRecord {
        ApplicationRecord {
            id: 3,
            ref_id: RefId::parse("APP-482913").unwrap(),
            full_name: "Jane Doe".to_owned(),
            email: "jane@example.com".to_owned(),
            phone: "+15550000000".to_owned(),
            gender: "Female".to_owned(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            course: "Data Science".to_owned(),
            session_time: "Morning".to_owned(),
            address: "1 Main St".to_owned(),
            submitted_at: NaiveDateTime::parse_from_str("2026-01-05 09:30:12", TIMESTAMP_FORMAT)
                .unwrap(),
        }
    }

    #[test]
    fn record_serializes_with_column_names() {
        let value = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 3,
                "ref_id": "APP-482913",
                "fullname": "Jane Doe",
                "email": "jane@example.com",
                "phone": "+15550000000",
                "gender": "Female",
                "dob": "2000-01-01",
                "course": "Data Science",
                "session_time": "Morning",
                "address": "1 Main St",
                "submission_date": "2026-01-05 09:30:12",
            })
        );
        let back: ApplicationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, sample_record());
    }

    #[test]
    fn receipt_date_uses_short_month_and_unpadded_day() {
        assert_eq!(sample_record().receipt_date(), "Jan 5, 2026 09:30");
    }
}
