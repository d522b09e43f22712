//! 🏷️ Stream names — the bouncer at the door of the data stream nightclub.
//!
//! 🎬 *[a config file shuffles up to the velvet rope. it says its name is "Logs-App".]*
//! *["Capital L?" says the bouncer. "Not tonight."]*
//!
//! 📐 A data stream name has to survive six checks before anything touches the network.
//! They run in a fixed order and the first one that trips wins. Order matters: a name
//! that is both uppercase AND full of forbidden characters gets told about its casing,
//! because that's the check that runs first.
//!
//! ✅ Pure. No I/O. Call it from as many threads as you like, it won't notice.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 🔧 The configuration key a data stream name lives under.
pub const DATA_STREAM_NAME_PARAM: &str = "data_stream_name";

/// 💀 Characters that may appear nowhere in a stream name.
pub const FORBIDDEN_CHARACTERS: &[char] =
    &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

/// 💀 Characters a stream name may not start with.
pub const FORBIDDEN_START_CHARACTERS: &[char] = &['-', '_', '+', '.'];

/// 📏 Byte ceiling for a stream name. Bytes, not chars. UTF-8 counts extra for the fancy ones.
pub const MAX_STREAM_NAME_BYTES: usize = 255;

/// 💀 Everything that can go wrong with a stream name, in the order we check for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("💀 required parameter '{0}' is missing. We can't bootstrap a data stream we can't name.")]
    MissingParameter(&'static str),

    #[error("💀 data stream name '{0}' must be all lowercase")]
    InvalidCase(String),

    #[error("💀 data stream name '{0}' must not contain any of {chars}", chars = render_set(.1))]
    InvalidCharacters(String, &'static [char]),

    #[error("💀 data stream name '{0}' must not start with any of {chars}", chars = render_set(.1))]
    InvalidStart(String, &'static [char]),

    #[error("💀 data stream name '{0}' is reserved and cannot be used")]
    ReservedName(String),

    #[error("💀 data stream name '{0}' is longer than {max} bytes", max = MAX_STREAM_NAME_BYTES)]
    TooLong(String),
}

// -- 🖨️ the whole set, every time. operators shouldn't have to play twenty questions.
fn render_set(set: &[char]) -> String {
    format!("{set:?}")
}

/// 🎯 A stream name that already passed every check. The only way to get one is [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentifier(String);

impl StreamIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for StreamIdentifier {
    type Err = ConfigError;

    fn from_str(candidate: &str) -> Result<Self, Self::Err> {
        validate(Some(candidate))
    }
}

/// 📜 One rule: "does this name trip it?" plus "what do we say when it does?"
struct NameRule {
    trips: fn(&str) -> bool,
    complain: fn(&str) -> ConfigError,
}

// -- 🔡 "changes under lowercasing" also catches titlecase letters like 'ǅ'
fn has_uppercase(name: &str) -> bool {
    name.to_lowercase() != name
}

fn has_forbidden_character(name: &str) -> bool {
    name.contains(FORBIDDEN_CHARACTERS)
}

// -- 🔍 "." and ".." start with a dot too, but they get their own, more specific, complaint.
fn has_forbidden_start(name: &str) -> bool {
    name.starts_with(FORBIDDEN_START_CHARACTERS) && !is_reserved(name)
}

fn is_reserved(name: &str) -> bool {
    name == "." || name == ".."
}

fn is_too_long(name: &str) -> bool {
    name.len() > MAX_STREAM_NAME_BYTES
}

// -- ⚠️ order is load-bearing. first match wins.
const NAME_RULES: [NameRule; 5] = [
    NameRule {
        trips: has_uppercase,
        complain: |name| ConfigError::InvalidCase(name.to_owned()),
    },
    NameRule {
        trips: has_forbidden_character,
        complain: |name| ConfigError::InvalidCharacters(name.to_owned(), FORBIDDEN_CHARACTERS),
    },
    NameRule {
        trips: has_forbidden_start,
        complain: |name| ConfigError::InvalidStart(name.to_owned(), FORBIDDEN_START_CHARACTERS),
    },
    NameRule {
        trips: is_reserved,
        complain: |name| ConfigError::ReservedName(name.to_owned()),
    },
    NameRule {
        trips: is_too_long,
        complain: |name| ConfigError::TooLong(name.to_owned()),
    },
];

/// 🚪 Validate a candidate data stream name.
///
/// `None` and `Some("")` both count as missing. Otherwise the rules run in order
/// (case, forbidden characters, leading character, reserved dot-names, length)
/// and the first one that trips is the error you get.
pub fn validate(candidate: Option<&str>) -> Result<StreamIdentifier, ConfigError> {
    let name = match candidate {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ConfigError::MissingParameter(DATA_STREAM_NAME_PARAM)),
    };

    match NAME_RULES.iter().find(|rule| (rule.trips)(name)) {
        Some(rule) => Err((rule.complain)(name)),
        None => Ok(StreamIdentifier(name.to_owned())),
    }
}
