//! Placeholder substitution for analysis command templates.
//!
//! A template is a shell command such as `run {source} --out {output_dir}`. Every `{name}`
//! token must come from [`KNOWN_PLACEHOLDERS`] and must have a value supplied by the caller.
use std::fmt::{Display, Formatter};

use chrono::{DateTime, SecondsFormat, Utc};
use nom::bytes::complete::take_while1;
use nom::character::complete::char;
use nom::sequence::delimited;

use crate::Map;
use crate::common::error::ValidationError;
use crate::common::parser::NomResult;

pub const SOURCE_DIR_PLACEHOLDER: &str = "source_dir";
pub const CONFIG_DIR_PLACEHOLDER: &str = "config_dir";
pub const OUTPUT_DIR_PLACEHOLDER: &str = "output_dir";
pub const TEMP_DIR_PLACEHOLDER: &str = "temp_dir";
pub const SOURCE_BASENAME_PLACEHOLDER: &str = "source_basename";
pub const CONFIG_BASENAME_PLACEHOLDER: &str = "config_basename";
pub const SOURCE_PLACEHOLDER: &str = "source";
pub const CONFIG_PLACEHOLDER: &str = "config";
pub const LATITUDE_PLACEHOLDER: &str = "latitude";
pub const LONGITUDE_PLACEHOLDER: &str = "longitude";
pub const TIMESTAMP_PLACEHOLDER: &str = "timestamp";
pub const ID_PLACEHOLDER: &str = "id";
pub const UUID_PLACEHOLDER: &str = "uuid";

pub const KNOWN_PLACEHOLDERS: [&str; 13] = [
    SOURCE_DIR_PLACEHOLDER,
    CONFIG_DIR_PLACEHOLDER,
    OUTPUT_DIR_PLACEHOLDER,
    TEMP_DIR_PLACEHOLDER,
    SOURCE_BASENAME_PLACEHOLDER,
    CONFIG_BASENAME_PLACEHOLDER,
    SOURCE_PLACEHOLDER,
    CONFIG_PLACEHOLDER,
    LATITUDE_PLACEHOLDER,
    LONGITUDE_PLACEHOLDER,
    TIMESTAMP_PLACEHOLDER,
    ID_PLACEHOLDER,
    UUID_PLACEHOLDER,
];

/// A template has to reference at least one placeholder from each group.
pub const REQUIRED_PLACEHOLDER_GROUPS: [&[&str]; 2] = [
    &[SOURCE_DIR_PLACEHOLDER, SOURCE_PLACEHOLDER],
    &[OUTPUT_DIR_PLACEHOLDER],
];

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Time(DateTime<Utc>),
}

impl Display for PlaceholderValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaceholderValue::Text(value) => f.write_str(value),
            PlaceholderValue::Integer(value) => write!(f, "{value}"),
            PlaceholderValue::Float(value) => write!(f, "{value}"),
            PlaceholderValue::Time(value) => {
                f.write_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

impl From<String> for PlaceholderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PlaceholderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for PlaceholderValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for PlaceholderValue {
    fn from(value: u64) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for PlaceholderValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for PlaceholderValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

/// Values for template placeholders. A `None` value is known but empty.
pub type PlaceholderMap = Map<String, Option<PlaceholderValue>>;

/// Fills the placeholders of `template` with `values`.
///
/// Fails if the template contains a placeholder outside of [`KNOWN_PLACEHOLDERS`], if a
/// placeholder has no entry in `values`, or if a group of [`REQUIRED_PLACEHOLDER_GROUPS`]
/// is not referenced at all.
pub fn format_command(template: &str, values: &PlaceholderMap) -> Result<String, ValidationError> {
    let parts = parse_template(template);
    let used: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            StringPart::Placeholder(name) => Some(*name),
            StringPart::Verbatim(_) => None,
        })
        .collect();

    if let Some(unknown) = used.iter().find(|name| !KNOWN_PLACEHOLDERS.contains(*name)) {
        return Err(ValidationError::UnknownPlaceholder(unknown.to_string()));
    }

    let mut buffer = String::with_capacity(template.len());
    for part in parts {
        match part {
            StringPart::Verbatim(data) => buffer.push_str(data),
            StringPart::Placeholder(name) => match values.get(name) {
                Some(Some(value)) => buffer.push_str(&value.to_string()),
                Some(None) => {}
                None => return Err(ValidationError::MissingValue(name.to_string())),
            },
        }
    }

    for group in REQUIRED_PLACEHOLDER_GROUPS {
        if !group.iter().any(|required| used.contains(required)) {
            return Err(ValidationError::MissingRequiredPlaceholder(group.to_vec()));
        }
    }

    Ok(buffer)
}

#[derive(Debug, Eq, PartialEq)]
pub enum StringPart<'a> {
    Verbatim(&'a str),
    Placeholder(&'a str),
}

fn parse_placeholder(data: &str) -> NomResult<'_, &str> {
    delimited(
        char('{'),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        char('}'),
    )(data)
}

/// Splits a template into verbatim text and `{name}` placeholders.
///
/// Braces that do not form a placeholder (`{}`, `{a,b}`, a lone `{`) are kept verbatim.
///
/// # Example
/// ```rust
/// use audioq::common::placeholders::{parse_template, StringPart};
///
/// assert_eq!(parse_template("a{b}c"), vec![
///     StringPart::Verbatim("a"),
///     StringPart::Placeholder("b"),
///     StringPart::Verbatim("c"),
/// ]);
/// ```
pub fn parse_template(data: &str) -> Vec<StringPart<'_>> {
    let mut parts = vec![];
    let mut verbatim_start = 0;
    let mut position = 0;

    while position < data.len() {
        if let Ok((rest, placeholder)) = parse_placeholder(&data[position..]) {
            if position > verbatim_start {
                parts.push(StringPart::Verbatim(&data[verbatim_start..position]));
            }
            parts.push(StringPart::Placeholder(placeholder));
            position = data.len() - rest.len();
            verbatim_start = position;
        } else {
            position += data[position..].chars().next().map_or(1, char::len_utf8);
        }
    }

    if verbatim_start < data.len() {
        parts.push(StringPart::Verbatim(&data[verbatim_start..]));
    }

    parts
}
