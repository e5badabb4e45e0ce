use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Per-call switches recognized by decision calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecideOption {
    /// Always call the CMAB endpoint, neither reading nor writing the cache.
    IgnoreCmabCache,
    /// Clear the whole CMAB cache before deciding.
    ResetCmabCache,
    /// Drop the cached CMAB decision of this user for the rule being decided.
    InvalidateUserCmabCache,
    /// Neither read nor write sticky bucketing decisions.
    IgnoreUserProfileService,
}

/// Set of [`DecideOption`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecideOptions {
    options: HashSet<DecideOption>,
}

impl DecideOptions {
    pub fn new() -> DecideOptions {
        DecideOptions::default()
    }

    pub fn with(mut self, option: DecideOption) -> DecideOptions {
        self.options.insert(option);
        self
    }

    pub fn insert(&mut self, option: DecideOption) {
        self.options.insert(option);
    }

    pub fn contains(&self, option: DecideOption) -> bool {
        self.options.contains(&option)
    }
}

impl FromIterator<DecideOption> for DecideOptions {
    fn from_iter<T: IntoIterator<Item = DecideOption>>(iter: T) -> Self {
        DecideOptions {
            options: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_option_names() {
        let options: DecideOptions =
            serde_json::from_str(r#"["IGNORE_CMAB_CACHE", "IGNORE_USER_PROFILE_SERVICE"]"#).unwrap();
        assert!(options.contains(DecideOption::IgnoreCmabCache));
        assert!(options.contains(DecideOption::IgnoreUserProfileService));
        assert!(!options.contains(DecideOption::ResetCmabCache));
    }
}
