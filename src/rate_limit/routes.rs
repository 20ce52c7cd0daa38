//! Route classification and the per-category quota table.
//!
//! Paths are classified by an ordered rule list evaluated first-match-wins,
//! over a tagged set of route categories. The quota table is plain data and
//! serde-serializable, so operators can tune limits without touching the
//! limiter itself.

use super::{Limit, Quota};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Traffic categories with distinct limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteCategory {
    /// Login, signup, password reset. Tight limits against credential
    /// stuffing.
    Auth,
    /// AI-assisted features; expensive per request.
    Assistant,
    /// Payment and billing operations.
    Payment,
    /// File and media uploads.
    Upload,
    /// Administrative endpoints.
    Admin,
    /// Everything else under the API prefix.
    Api,
    /// Not rate limited at all (non-API paths).
    Exempt,
}

/// Path predicate used by the classification rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathPattern {
    Prefix(String),
    Contains(String),
}

impl PathPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        PathPattern::Prefix(prefix.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        PathPattern::Contains(needle.into())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Contains(needle) => path.contains(needle.as_str()),
        }
    }
}

/// Ordered classification rules plus the per-category quota table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicy {
    rules: Vec<(PathPattern, RouteCategory)>,
    quotas: HashMap<RouteCategory, Quota>,
    /// Limit multiplier for authenticated callers on the generic [`RouteCategory::Api`]
    /// category.
    authenticated_multiplier: f64,
}

const API_PREFIX: &str = "/api";

impl Default for RoutePolicy {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        let mut quotas = HashMap::new();
        quotas.insert(
            RouteCategory::Auth,
            Quota::unchecked(
                Duration::from_secs(15 * 60),
                Limit::Bounded(10),
                Some("Too many authentication attempts, please try again later"),
            ),
        );
        quotas.insert(
            RouteCategory::Assistant,
            Quota::unchecked(
                minute,
                Limit::Bounded(20),
                Some("AI request limit reached, please slow down"),
            ),
        );
        quotas.insert(
            RouteCategory::Payment,
            Quota::unchecked(minute, Limit::Bounded(30), Some("Too many payment requests")),
        );
        quotas.insert(
            RouteCategory::Upload,
            Quota::unchecked(minute, Limit::Bounded(20), Some("Upload limit reached")),
        );
        quotas.insert(
            RouteCategory::Admin,
            Quota::unchecked(minute, Limit::Bounded(60), None),
        );
        quotas.insert(
            RouteCategory::Api,
            Quota::unchecked(
                minute,
                Limit::Bounded(100),
                Some("Too many requests, please try again later"),
            ),
        );

        Self {
            rules: vec![
                (PathPattern::prefix("/api/auth"), RouteCategory::Auth),
                (PathPattern::prefix("/api/assistant"), RouteCategory::Assistant),
                (PathPattern::contains("/ai/"), RouteCategory::Assistant),
                (PathPattern::prefix("/api/payments"), RouteCategory::Payment),
                (PathPattern::prefix("/api/admin"), RouteCategory::Admin),
                (PathPattern::contains("/upload"), RouteCategory::Upload),
            ],
            quotas,
            authenticated_multiplier: 1.5,
        }
    }
}

impl RoutePolicy {
    /// Classify a request path. Non-API paths are exempt; API paths fall
    /// through the rules to the generic category.
    pub fn categorize(&self, path: &str) -> RouteCategory {
        if !path.starts_with(API_PREFIX) {
            return RouteCategory::Exempt;
        }
        for (pattern, category) in &self.rules {
            if pattern.matches(path) {
                return *category;
            }
        }
        RouteCategory::Api
    }

    /// Quota for a category. Authenticated callers on the generic API
    /// category get the configured multiplier over the anonymous limit.
    pub fn quota_for(&self, category: RouteCategory, authenticated: bool) -> Quota {
        if category == RouteCategory::Exempt {
            return Quota::unlimited();
        }
        let base = match self.quotas.get(&category) {
            Some(quota) => quota.clone(),
            None => Quota::unchecked(Duration::from_secs(60), Limit::Bounded(100), None),
        };
        if category == RouteCategory::Api && authenticated {
            if let Limit::Bounded(max) = base.max() {
                let scaled = ((f64::from(max)) * self.authenticated_multiplier).floor() as u32;
                return base.with_limit(Limit::Bounded(scaled.max(1)));
            }
        }
        base
    }

    /// Append a classification rule; earlier rules win.
    pub fn add_rule(&mut self, pattern: PathPattern, category: RouteCategory) {
        self.rules.push((pattern, category));
    }

    /// Replace the quota for a category.
    pub fn set_quota(&mut self, category: RouteCategory, quota: Quota) {
        self.quotas.insert(category, quota);
    }

    pub fn set_authenticated_multiplier(&mut self, multiplier: f64) {
        self.authenticated_multiplier = multiplier.max(1.0);
    }
}
