// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};

use strum_macros::{AsRefStr, EnumString};

/// The kind of problem behind a failed build or stage.
#[derive(AsRefStr, Clone, Copy, Debug, EnumString, Eq, Hash, PartialEq)]
pub enum FailureCategory {
    /// Problems with the build infrastructure.
    Infra,
    /// Problems with the test lab.
    Lab,
    /// Failing tests.
    Test,
    Unknown,
}

/// One exception recorded for a failed stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureRecord {
    pub category: FailureCategory,
    pub type_name: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl FailureRecord {
    pub fn new(
        category: FailureCategory,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    fn summary(&self) -> String {
        format!("{}: {}", self.type_name, self.message)
    }
}

impl Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        if let Some(traceback) = &self.traceback {
            write!(f, "\n{traceback}")?;
        }
        Ok(())
    }
}

/// A build failure made of one or more recorded exceptions.
///
/// The category is shared by all inner records, or [`FailureCategory::Unknown`]
/// for a compound failure mixing categories.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildFailure {
    pub category: FailureCategory,
    pub failures: Vec<FailureRecord>,
}

impl BuildFailure {
    pub fn from_records(failures: Vec<FailureRecord>) -> Self {
        let mut categories = failures.iter().map(|f| f.category);
        let category = match categories.next() {
            Some(first) if categories.all(|c| c == first) => first,
            _ => FailureCategory::Unknown,
        };
        Self { category, failures }
    }

    /// Combines two failures into a compound one.
    pub fn merge(self, other: BuildFailure) -> BuildFailure {
        let category = if self.category == other.category {
            self.category
        } else {
            FailureCategory::Unknown
        };
        let mut failures = self.failures;
        failures.extend(other.failures);
        BuildFailure { category, failures }
    }

    /// Whether any inner failure is of `category`.
    pub fn has_category(&self, category: FailureCategory) -> bool {
        self.failures.iter().any(|f| f.category == category)
    }

    /// Whether every inner failure is of `category`. False for a failure
    /// without inner records.
    pub fn matches_category(&self, category: FailureCategory) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.category == category)
    }

    /// Renders the failure without tracebacks.
    pub fn to_summary_string(&self) -> String {
        let messages: Vec<String> = self.failures.iter().map(FailureRecord::summary).collect();
        format!("[{}] {}", self.category.as_ref(), messages.join("; "))
    }
}

impl Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.category.as_ref())?;
        for failure in &self.failures {
            write!(f, "\n{failure}")?;
        }
        Ok(())
    }
}

/// Merges all `failures` into one, or returns `None` when there are none.
pub fn merge_all(failures: impl IntoIterator<Item = BuildFailure>) -> Option<BuildFailure> {
    failures.into_iter().reduce(BuildFailure::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn infra() -> BuildFailure {
        BuildFailure::from_records(vec![FailureRecord::new(
            FailureCategory::Infra,
            "GSUploadError",
            "upload timed out",
        )
        .with_traceback("Traceback:\n  upload()")])
    }

    fn test_failure() -> BuildFailure {
        BuildFailure::from_records(vec![FailureRecord::new(
            FailureCategory::Test,
            "TestFailure",
            "login_Basic failed",
        )])
    }

    #[test]
    fn test_merge_same_category() {
        let merged = infra().merge(infra());
        assert_eq!(FailureCategory::Infra, merged.category);
        assert_eq!(2, merged.failures.len());
        assert!(merged.matches_category(FailureCategory::Infra));
    }

    #[test]
    fn test_merge_mixed_categories() {
        let merged = infra().merge(test_failure());
        assert_eq!(FailureCategory::Unknown, merged.category);
        assert_eq!(2, merged.failures.len());
        assert!(!merged.matches_category(FailureCategory::Infra));
        assert!(merged.has_category(FailureCategory::Infra));
        assert!(merged.has_category(FailureCategory::Test));
        assert!(!merged.has_category(FailureCategory::Lab));
    }

    #[test]
    fn test_from_records() {
        let empty = BuildFailure::from_records(Vec::new());
        assert_eq!(FailureCategory::Unknown, empty.category);
        assert!(!empty.has_category(FailureCategory::Unknown));
        assert!(!empty.matches_category(FailureCategory::Unknown));

        let mixed = BuildFailure::from_records(vec![
            FailureRecord::new(FailureCategory::Lab, "DUTUnavailable", "no DUTs"),
            FailureRecord::new(FailureCategory::Test, "TestFailure", "failed"),
        ]);
        assert_eq!(FailureCategory::Unknown, mixed.category);
    }

    #[test]
    fn test_summary_omits_tracebacks() {
        let merged = infra().merge(test_failure());
        assert_eq!(
            "[Unknown] GSUploadError: upload timed out; TestFailure: login_Basic failed",
            merged.to_summary_string()
        );
        assert_eq!(
            "[Unknown]\nGSUploadError: upload timed out\nTraceback:\n  upload()\n\
             TestFailure: login_Basic failed",
            merged.to_string()
        );
    }

    #[test]
    fn test_merge_all() {
        assert_eq!(None, merge_all(Vec::new()));
        let merged = merge_all([test_failure(), test_failure(), test_failure()]).unwrap();
        assert_eq!(FailureCategory::Test, merged.category);
        assert_eq!(3, merged.failures.len());
    }
}
