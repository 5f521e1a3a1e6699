use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical module owning a set of migrations.
///
/// The empty string is the core/global namespace. In grouped history output it
/// is shown under [`ModuleId::CORE_LABEL`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub const CORE_LABEL: &'static str = "all";

    pub fn core() -> Self {
        Self(String::new())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_core(&self) -> bool {
        self.0.is_empty()
    }

    /// A named module that would be indistinguishable from core in grouped
    /// output.
    pub fn is_reserved(&self) -> bool {
        self.0 == Self::CORE_LABEL
    }

    /// Name used when grouping history by module.
    pub fn label(&self) -> &str {
        if self.is_core() {
            Self::CORE_LABEL
        } else {
            &self.0
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
