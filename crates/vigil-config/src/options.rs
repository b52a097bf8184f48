//! Enumerated configuration options shared by the daemon and its tooling.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Output encoding for daemon log lines.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Deployment profile the daemon runs under.
///
/// The profile is recorded in every status snapshot so operators can tell
/// which configuration a crashed run was using.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Profile {
    /// Single node collecting and storing its own data.
    #[default]
    Standalone,
    /// Node receiving streamed data from children.
    Parent,
    /// Node streaming its data to a parent.
    Child,
    /// Resource-constrained node with reduced retention.
    Iot,
}

impl Profile {
    /// Every profile, in declaration order.
    pub const ALL: [Self; 4] = [Self::Standalone, Self::Parent, Self::Child, Self::Iot];

    /// Stable lowercase name used in persisted records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Errors encountered while parsing an option from text.
pub type OptionParseError = strum::ParseError;
