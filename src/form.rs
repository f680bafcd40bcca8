//! Submission bodies and their validation.
//!
//! The browser form posts `application/x-www-form-urlencoded`; JSON objects are
//! accepted as well. Fields are echoed back to the client exactly as received,
//! while the typed [`NewApplication`] is what reaches storage. A missing or
//! blank required field rejects the whole submission.

use std::fmt;

use chrono::NaiveDate;
use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, Visitor},
};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{DATE_FORMAT, NewApplication};

const FULL_NAME: &[&str] = &["fullname", "fullName", "full_name"];
const EMAIL: &[&str] = &["email"];
const PHONE: &[&str] = &["phone"];
const GENDER: &[&str] = &["gender"];
const DATE_OF_BIRTH: &[&str] = &["dob", "dateOfBirth", "date_of_birth"];
const COURSE: &[&str] = &["course"];
const SESSION_TIME: &[&str] = &["session", "sessionTime", "session_time"];
const ADDRESS: &[&str] = &["address"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid date of birth `{0}`; expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    UrlEncoded,
    Json,
}

impl BodyFormat {
    /// A missing content type is treated as a urlencoded form post.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, FormError> {
        let Some(content_type) = content_type else {
            return Ok(Self::UrlEncoded);
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "" | "application/x-www-form-urlencoded" => Ok(Self::UrlEncoded),
            "application/json" => Ok(Self::Json),
            _ => Err(FormError::UnsupportedContentType(content_type.to_owned())),
        }
    }
}

/// Fields of one submission, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmittedFields {
    echo: Map<String, Value>,
    values: Vec<(String, String)>,
}

impl SubmittedFields {
    pub fn parse(format: BodyFormat, body: &[u8]) -> Result<Self, FormError> {
        match format {
            BodyFormat::UrlEncoded => Ok(Self::from_urlencoded(body)),
            BodyFormat::Json => Self::from_json(body),
        }
    }

    pub fn from_urlencoded(body: &[u8]) -> Self {
        Self::from_pairs(
            url::form_urlencoded::parse(body)
                .map(|(key, value)| (key.into_owned(), value.into_owned())),
        )
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.into(), value.into());
            fields.echo.insert(key.clone(), Value::String(value.clone()));
            fields.values.push((key, value));
        }
        fields
    }

    pub fn from_json(body: &[u8]) -> Result<Self, FormError> {
        let OrderedObject(entries) =
            serde_json::from_slice(body).map_err(|err| FormError::InvalidBody(err.to_string()))?;

        let mut fields = Self::default();
        for (key, value) in entries {
            let text = match &value {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(FormError::InvalidBody(format!(
                        "field `{key}` must be a string"
                    )));
                }
            };
            if let Some(text) = text {
                fields.values.push((key.clone(), text));
            }
            fields.echo.insert(key, value);
        }
        Ok(fields)
    }

    /// The submission as received, for echoing back on the receipt.
    pub fn echo(&self) -> &Map<String, Value> {
        &self.echo
    }

    /// Last value under any of `names`, unless blank. Repeated keys override
    /// earlier ones.
    fn lookup(&self, names: &[&str]) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(key, _)| names.contains(&key.as_str()))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }

    fn required(&self, names: &'static [&'static str]) -> Result<String, FormError> {
        self.lookup(names)
            .map(str::to_owned)
            .ok_or(FormError::MissingField(names[0]))
    }

    pub fn to_application(&self) -> Result<NewApplication, FormError> {
        let full_name = self.required(FULL_NAME)?;
        let email = self.required(EMAIL)?;
        let phone = self.required(PHONE)?;
        let gender = self.required(GENDER)?;
        let dob = self.required(DATE_OF_BIRTH)?;
        let course = self.required(COURSE)?;
        let session_time = self.required(SESSION_TIME)?;
        let address = self.required(ADDRESS)?;

        let date_of_birth = NaiveDate::parse_from_str(dob.trim(), DATE_FORMAT)
            .map_err(|_| FormError::InvalidDate(dob.clone()))?;

        Ok(NewApplication {
            full_name,
            email,
            phone,
            gender,
            date_of_birth,
            course,
            session_time,
            address,
        })
    }
}

/// Top-level JSON object entries in document order. `serde_json::Map` sorts
/// its keys, which would make alias precedence depend on spelling.
struct OrderedObject(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for OrderedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedObject;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(OrderedObject(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
