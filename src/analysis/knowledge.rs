//! Declarative metric-to-root-cause rules.
//!
//! Rules are plain data: a condition tree over metric values, a confidence,
//! an explanation template and remediation steps. The built-in set covers
//! resource exhaustion and link degradation; more rules can be appended from
//! configuration.
//!
//! Templates reference metrics as `{name}` or `{name:.N}` (N decimal
//! places). `{{` and `}}` produce literal braces. When `loss_rate` is
//! present, `loss_rate_pct` is available as well.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::analysis::RootCauseType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("template references unknown metric `{name}`")]
    UnknownPlaceholder { name: String },

    #[error("malformed template: {reason}")]
    MalformedTemplate { reason: String },
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Gt => lhs > rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }
}

/// Predicate over a metrics map. A comparison against a missing metric is
/// false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare {
        metric: String,
        op: Comparator,
        value: f64,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn compare(metric: &str, op: Comparator, value: f64) -> Self {
        Condition::Compare {
            metric: metric.to_string(),
            op,
            value,
        }
    }

    pub fn evaluate(&self, metrics: &BTreeMap<String, f64>) -> bool {
        match self {
            Condition::Compare { metric, op, value } => metrics
                .get(metric)
                .is_some_and(|&actual| op.holds(actual, *value)),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(metrics)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(metrics)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { metric, op, value } => {
                write!(f, "{metric} {} {value}", op.symbol())
            }
            Condition::All { conditions } => write_joined(f, conditions, "and"),
            Condition::Any { conditions } => {
                f.write_str("(")?;
                write_joined(f, conditions, "or")?;
                f.write_str(")")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, conditions: &[Condition], sep: &str) -> fmt::Result {
    for (i, c) in conditions.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRule {
    pub rule_id: String,
    pub name: String,
    pub cause_type: RootCauseType,
    pub condition: Condition,
    /// The rule is skipped unless every listed metric is present.
    #[serde(default)]
    pub required_metrics: Vec<String>,
    pub confidence: f64,
    pub explanation_template: String,
    #[serde(default)]
    pub remediation_suggestions: Vec<String>,
}

/// A rule that fired, with its rendered explanation.
#[derive(Debug, Clone)]
pub struct RuleMatch<'a> {
    pub rule: &'a CausalRule,
    pub explanation: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    rules: Vec<CausalRule>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl KnowledgeBase {
    /// Built-in rules followed by `extra`, in that evaluation order.
    pub fn with_extra_rules(extra: impl IntoIterator<Item = CausalRule>) -> Self {
        let mut kb = Self::default();
        kb.rules.extend(extra);
        kb
    }

    pub fn rules(&self) -> &[CausalRule] {
        &self.rules
    }

    /// Every rule whose condition holds for `metrics`, in rule order.
    ///
    /// A rule whose template cannot be rendered is logged and skipped; the
    /// remaining rules are still evaluated.
    pub fn evaluate(&self, metrics: &BTreeMap<String, f64>) -> Vec<RuleMatch<'_>> {
        let mut values = metrics.clone();
        if let Some(&loss) = metrics.get("loss_rate") {
            values.insert("loss_rate_pct".to_string(), loss * 100.0);
        }

        let mut matches = Vec::new();
        for rule in &self.rules {
            if let Some(missing) = rule
                .required_metrics
                .iter()
                .find(|m| !metrics.contains_key(m.as_str()))
            {
                debug!(rule = %rule.rule_id, missing = %missing, "rule skipped, metric absent");
                continue;
            }
            if !rule.condition.evaluate(metrics) {
                continue;
            }

            match render(&rule.explanation_template, &values) {
                Ok(explanation) => matches.push(RuleMatch {
                    rule,
                    explanation,
                    confidence: rule.confidence.clamp(0.0, 1.0),
                }),
                Err(e) => {
                    warn!(rule = %rule.rule_id, error = %e, "rule explanation failed to render, skipping");
                }
            }
        }
        matches
    }
}

/// Substitute `{name}` / `{name:.N}` placeholders from `values`.
pub fn render(template: &str, values: &BTreeMap<String, f64>) -> Result<String, RuleError> {
    let malformed = |reason: &str| RuleError::MalformedTemplate {
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(malformed("unmatched `}`"));
        }

        let close = tail.find('}').ok_or_else(|| malformed("unclosed `{`"))?;
        let placeholder = &tail[1..close];
        if placeholder.contains('{') {
            return Err(malformed("nested `{`"));
        }

        let (name, format) = match placeholder.split_once(':') {
            Some((name, format)) => (name, Some(format)),
            None => (placeholder, None),
        };
        if name.is_empty() {
            return Err(malformed("empty placeholder"));
        }
        let value = values
            .get(name)
            .copied()
            .ok_or_else(|| RuleError::UnknownPlaceholder {
                name: name.to_string(),
            })?;

        match format {
            None => out.push_str(&value.to_string()),
            Some(format) => {
                let precision: usize = format
                    .strip_prefix('.')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| malformed("format must be `.N`"))?;
                out.push_str(&format!("{value:.precision$}"));
            }
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn rule(
    rule_id: &str,
    name: &str,
    cause_type: RootCauseType,
    condition: Condition,
    metric: &str,
    confidence: f64,
    template: &str,
    remediation: &[&str],
) -> CausalRule {
    CausalRule {
        rule_id: rule_id.to_string(),
        name: name.to_string(),
        cause_type,
        condition,
        required_metrics: vec![metric.to_string()],
        confidence,
        explanation_template: template.to_string(),
        remediation_suggestions: remediation.iter().map(|s| s.to_string()).collect(),
    }
}

fn band(metric: &str, above: f64, at_most: f64) -> Condition {
    Condition::All {
        conditions: vec![
            Condition::compare(metric, Comparator::Gt, above),
            Condition::compare(metric, Comparator::Le, at_most),
        ],
    }
}

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> Vec<CausalRule> {
    use Comparator::{Gt, Lt};
    use RootCauseType::{NetworkDegradation, ResourceExhaustion};

    vec![
        rule(
            "cpu_critical",
            "CPU saturation",
            ResourceExhaustion,
            Condition::compare("cpu_percent", Gt, 95.0),
            "cpu_percent",
            0.9,
            "CPU critically saturated at {cpu_percent:.1}%",
            &[
                "Restart the runaway process or service",
                "Check for CPU-bound tasks with top or perf",
                "Scale out or add CPU capacity to the node",
            ],
        ),
        rule(
            "cpu_high",
            "High CPU load",
            ResourceExhaustion,
            band("cpu_percent", 90.0, 95.0),
            "cpu_percent",
            0.8,
            "CPU load high at {cpu_percent:.1}%",
            &[
                "Review recent deployments for CPU regressions",
                "Rebalance workloads across mesh nodes",
            ],
        ),
        rule(
            "memory_critical",
            "Memory exhaustion",
            ResourceExhaustion,
            Condition::compare("memory_percent", Gt, 95.0),
            "memory_percent",
            0.85,
            "Memory nearly exhausted at {memory_percent:.1}%",
            &[
                "Restart the service to reclaim leaked memory",
                "Investigate heap growth for memory leaks",
                "Raise memory limits or add swap",
            ],
        ),
        rule(
            "memory_high",
            "Memory pressure",
            ResourceExhaustion,
            band("memory_percent", 90.0, 95.0),
            "memory_percent",
            0.75,
            "Memory pressure at {memory_percent:.1}%",
            &[
                "Check for memory leaks in long-running services",
                "Tune cache sizes to reduce memory footprint",
            ],
        ),
        rule(
            "loss_rate_high",
            "Packet loss",
            NetworkDegradation,
            Condition::compare("loss_rate", Gt, 0.05),
            "loss_rate",
            0.85,
            "Packet loss at {loss_rate_pct:.1}% indicates link degradation",
            &[
                "Check link quality and interface error counters",
                "Verify antenna alignment and cabling",
                "Reroute traffic over an alternate mesh path",
            ],
        ),
        rule(
            "rssi_weak",
            "Weak signal",
            NetworkDegradation,
            Condition::compare("rssi", Lt, -85.0),
            "rssi",
            0.75,
            "Weak signal strength at {rssi:.0} dBm",
            &[
                "Check for physical obstructions or interference",
                "Reposition the node or add a relay",
                "Increase transmit power within regulatory limits",
            ],
        ),
        rule(
            "latency_high",
            "High latency",
            NetworkDegradation,
            Condition::compare("latency", Gt, 500.0),
            "latency",
            0.8,
            "Latency at {latency:.0}ms exceeds 500ms",
            &[
                "Investigate congestion on the routing path",
                "Review QoS and queueing configuration",
                "Add capacity on saturated links",
            ],
        ),
    ]
}
