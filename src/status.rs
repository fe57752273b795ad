use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a build job.
///
/// ```text
/// pending --(claimed)--> building --> failed | exception | succeed
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Building,
    Failed,
    Succeed,
    Exception,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Failed => "failed",
            Self::Succeed => "succeed",
            Self::Exception => "exception",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Succeed | Self::Exception)
    }

    /// Transitions only move forward and never leave a terminal state.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match self {
            Self::Pending => next == Self::Building,
            Self::Building => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "failed" => Ok(Self::Failed),
            "succeed" => Ok(Self::Succeed),
            "exception" => Ok(Self::Exception),
            other => anyhow::bail!("unknown build status '{other}'"),
        }
    }
}

/// Source language of a submission
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "c++")]
    Cpp,
    Pascal,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::Pascal => "pascal",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpp" | "c++" => Ok(Self::Cpp),
            "pascal" => Ok(Self::Pascal),
            other => anyhow::bail!("unknown language '{other}'"),
        }
    }
}
