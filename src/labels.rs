//! Group labels attached to every resource kess creates.
//!
//! Teardown never consults a stored inventory. It asks the engine for
//! everything carrying [`GROUP_LABEL`] and removes that.

use std::collections::HashMap;

/// Marker present on every container, network and volume kess creates.
pub const GROUP_LABEL: &str = "kess";
/// Role label on platform services; value is the service role.
pub const SYSTEM_LABEL: &str = "kess-system";
/// Label on both halves of a workload pair; value is the app id.
pub const APP_LABEL: &str = "kess-app";
/// Label on the sidecar half of a workload pair; value is the app id.
pub const SIDECAR_LABEL: &str = "kess-app-sidecar";
/// Label on short-lived helper containers.
pub const TOOLS_LABEL: &str = "kess-tools";

/// Label set builder. The group marker is always present and cannot be
/// overridden by caller labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    extra: HashMap<String, String>,
}

impl Labels {
    /// Only the group marker.
    pub fn base() -> HashMap<String, String> {
        Self::default().build()
    }

    /// Group marker plus the given role labels.
    pub fn with<K, V>(extra: impl IntoIterator<Item = (K, V)>) -> HashMap<String, String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::default();
        for (k, v) in extra {
            labels = labels.label(k, v);
        }
        labels.build()
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> HashMap<String, String> {
        let mut out = self.extra;
        out.insert(GROUP_LABEL.to_string(), String::new());
        out
    }

    /// Platform service labels.
    pub fn system(role: &str) -> HashMap<String, String> {
        Self::with([(SYSTEM_LABEL, role)])
    }
}

/// A label selector as understood by the engine's list filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    key: String,
    value: Option<String>,
}

impl LabelFilter {
    /// Everything kess created.
    pub fn group() -> Self {
        Self::key(GROUP_LABEL)
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Docker filter expression: `key` or `key=value`.
    pub fn expression(&self) -> String {
        match &self.value {
            Some(v) => format!("{}={}", self.key, v),
            None => self.key.clone(),
        }
    }

    /// Whether a label map satisfies this selector.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match (labels.get(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_has_group_marker() {
        let labels = Labels::base();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get(GROUP_LABEL).map(String::as_str), Some(""));
    }

    #[test]
    fn test_group_marker_wins_on_collision() {
        let labels = Labels::with([(GROUP_LABEL, "hijacked"), (APP_LABEL, "svc1")]);
        assert_eq!(labels.get(GROUP_LABEL).map(String::as_str), Some(""));
        assert_eq!(labels.get(APP_LABEL).map(String::as_str), Some("svc1"));
    }

    #[test]
    fn test_system_labels() {
        let labels = Labels::system("redis");
        assert_eq!(labels.get(SYSTEM_LABEL).map(String::as_str), Some("redis"));
        assert!(labels.contains_key(GROUP_LABEL));
    }

    #[test]
    fn test_filter_expression() {
        assert_eq!(LabelFilter::group().expression(), "kess");
        assert_eq!(
            LabelFilter::key_value(APP_LABEL, "svc1").expression(),
            "kess-app=svc1"
        );
    }

    #[test]
    fn test_filter_matches() {
        let labels = Labels::with([(APP_LABEL, "svc1")]);
        assert!(LabelFilter::group().matches(&labels));
        assert!(LabelFilter::key_value(APP_LABEL, "svc1").matches(&labels));
        assert!(!LabelFilter::key_value(APP_LABEL, "svc2").matches(&labels));
        assert!(!LabelFilter::key(SIDECAR_LABEL).matches(&labels));
    }
}
