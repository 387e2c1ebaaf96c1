//! Ingestion filter engine
//!
//! Pure and stateless: a decision depends only on `(service_name, severity)`
//! and the loaded configuration, so it is safe to call from receiver tasks
//! and trivial to test.
//!
//! Rules apply in fixed order: excluded services first, then the allow list,
//! then (for logs only) the severity floor. The deny list wins over the allow
//! list so an operator can silence one noisy service without rewriting the
//! allow list.

use std::collections::HashSet;

use crate::data::records::Severity;

/// Filter configuration. An empty allow list admits any service.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub min_severity: Severity,
    pub allowed_services: HashSet<String>,
    pub excluded_services: HashSet<String>,
}

/// Outcome of a filter check; rejections carry the reason for per-category
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Admit,
    RejectedExcluded,
    RejectedNotAllowed,
    RejectedSeverity,
}

impl FilterDecision {
    pub fn is_admit(self) -> bool {
        matches!(self, FilterDecision::Admit)
    }

    /// Counter label for rejected records.
    pub fn reason(self) -> &'static str {
        match self {
            FilterDecision::Admit => "admit",
            FilterDecision::RejectedExcluded => "deny",
            FilterDecision::RejectedNotAllowed => "allow-miss",
            FilterDecision::RejectedSeverity => "severity",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterEngine {
    config: FilterConfig,
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Check a log record against service rules and the severity floor.
    pub fn check_log(&self, service_name: &str, severity: Severity) -> FilterDecision {
        let decision = self.check_service(service_name);
        if !decision.is_admit() {
            return decision;
        }
        if severity.numeric() < self.config.min_severity.numeric() {
            return FilterDecision::RejectedSeverity;
        }
        FilterDecision::Admit
    }

    /// Check a trace against service rules. Traces are not severity-filtered.
    pub fn check_trace(&self, service_name: &str) -> FilterDecision {
        self.check_service(service_name)
    }

    fn check_service(&self, service_name: &str) -> FilterDecision {
        if self.config.excluded_services.contains(service_name) {
            return FilterDecision::RejectedExcluded;
        }
        if !self.config.allowed_services.is_empty()
            && !self.config.allowed_services.contains(service_name)
        {
            return FilterDecision::RejectedNotAllowed;
        }
        FilterDecision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(min: Severity, allowed: &[&str], excluded: &[&str]) -> FilterEngine {
        FilterEngine::new(FilterConfig {
            min_severity: min,
            allowed_services: allowed.iter().map(|s| s.to_string()).collect(),
            excluded_services: excluded.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_default_config_admits_info_and_above() {
        let engine = engine(Severity::Info, &[], &[]);
        assert_eq!(
            engine.check_log("order", Severity::Debug),
            FilterDecision::RejectedSeverity
        );
        assert!(engine.check_log("order", Severity::Info).is_admit());
        assert!(engine.check_log("order", Severity::Fatal).is_admit());
    }

    #[test]
    fn test_severity_floor_warn() {
        let engine = engine(Severity::Warn, &[], &[]);
        let outcomes: Vec<bool> = [
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ]
        .iter()
        .map(|s| engine.check_log("order", *s).is_admit())
        .collect();
        assert_eq!(outcomes, vec![false, false, true, true, true]);
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let engine = engine(Severity::Info, &["a", "b"], &["a"]);
        assert_eq!(
            engine.check_trace("a"),
            FilterDecision::RejectedExcluded
        );
        assert!(engine.check_trace("b").is_admit());
        assert_eq!(
            engine.check_trace("c"),
            FilterDecision::RejectedNotAllowed
        );
    }

    #[test]
    fn test_empty_allow_list_admits_any_service() {
        let engine = engine(Severity::Info, &[], &["noisy"]);
        assert!(engine.check_trace("anything").is_admit());
        assert_eq!(
            engine.check_trace("noisy"),
            FilterDecision::RejectedExcluded
        );
    }

    #[test]
    fn test_traces_are_not_severity_filtered() {
        let engine = engine(Severity::Fatal, &[], &[]);
        assert!(engine.check_trace("order").is_admit());
    }

    #[test]
    fn test_decision_is_deterministic() {
        let engine = engine(Severity::Warn, &["a"], &["b"]);
        for _ in 0..3 {
            assert_eq!(
                engine.check_log("a", Severity::Info),
                FilterDecision::RejectedSeverity
            );
            assert_eq!(
                engine.check_log("b", Severity::Error),
                FilterDecision::RejectedExcluded
            );
        }
    }
}
