//! Process trigger matching
//!
//! Compiles the `match` rules of enabled profiles and picks the winning
//! profile for a list of process command lines.

use apu_protocol::Profile;
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Trigger derived from one enabled profile with at least one valid pattern
#[derive(Debug, Clone)]
pub struct CompiledTrigger {
    pub profile_name: String,
    pub regexes: Vec<Regex>,
    pub priority: i32,
}

impl CompiledTrigger {
    /// Any pattern against any line
    pub fn matches<S: AsRef<str>>(&self, lines: &[S]) -> bool {
        lines
            .iter()
            .any(|line| self.regexes.iter().any(|re| re.is_match(line.as_ref())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    triggers: Vec<CompiledTrigger>,
}

impl PatternMatcher {
    /// Build from scratch; invalid patterns are skipped with a warning
    pub fn compile(profiles: &[Profile]) -> Self {
        let triggers = profiles
            .iter()
            .filter(|p| p.match_rule.enabled && !p.match_rule.patterns.is_empty())
            .filter_map(|p| {
                let regexes: Vec<Regex> = p
                    .match_rule
                    .patterns
                    .iter()
                    .filter_map(|pattern| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| {
                                warn!(profile = %p.name, "Skipping invalid pattern {:?}: {}", pattern, e)
                            })
                            .ok()
                    })
                    .collect();

                (!regexes.is_empty()).then(|| CompiledTrigger {
                    profile_name: p.name.clone(),
                    regexes,
                    priority: p.match_rule.priority,
                })
            })
            .collect();

        Self { triggers }
    }

    pub fn triggers(&self) -> &[CompiledTrigger] {
        &self.triggers
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Highest priority among matching triggers; ties go to the smaller name
    pub fn evaluate<S: AsRef<str>>(&self, lines: &[S]) -> Option<&CompiledTrigger> {
        self.triggers
            .iter()
            .filter(|t| t.matches(lines))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.profile_name.cmp(&a.profile_name))
            })
    }
}
