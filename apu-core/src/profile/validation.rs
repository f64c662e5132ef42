//! Structural profile validation
//!
//! Runs before any hardware interaction. Value bounds are checked separately
//! by the hardware strategy against the active limits.

use crate::constants::profile::{MAX_DESCRIPTION_LEN, MAX_NAME_LEN, MAX_PATTERNS};
use apu_protocol::Profile;
use regex::RegexBuilder;

/// Starts with an ASCII letter or digit, continues with letters, digits or hyphens
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.len() <= MAX_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// OS power-profile names are passed to a subprocess as one argument
fn is_valid_power_profile(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn validate_structure(profile: &Profile) -> Vec<String> {
    let mut errors = Vec::new();

    if !is_valid_name(&profile.name) {
        errors.push(format!(
            "name {:?} must start with a letter or digit and contain only letters, digits and hyphens (max {} chars)",
            profile.name, MAX_NAME_LEN
        ));
    }

    if let Some(description) = &profile.description {
        if description.len() > MAX_DESCRIPTION_LEN {
            errors.push(format!("description must be at most {} bytes", MAX_DESCRIPTION_LEN));
        }
    }

    if let Some(power_profile) = &profile.power_profile {
        if !is_valid_power_profile(power_profile) {
            errors.push(format!("powerProfile {:?} is not a valid power profile name", power_profile));
        }
    }

    let rule = &profile.match_rule;
    if rule.patterns.len() > MAX_PATTERNS {
        errors.push(format!("match.patterns must have at most {} entries", MAX_PATTERNS));
    }
    for (i, pattern) in rule.patterns.iter().enumerate() {
        if pattern.trim().is_empty() {
            errors.push(format!("match.patterns[{}] must not be empty", i));
        } else if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
            errors.push(format!("match.patterns[{}] is not a valid regular expression: {}", i, e));
        }
    }

    if let Some(revert) = &rule.revert_profile {
        if !is_valid_name(revert) {
            errors.push(format!("match.revertProfile {:?} is not a valid profile name", revert));
        } else if revert == &profile.name {
            errors.push("match.revertProfile must name a different profile".to_string());
        }
    }

    errors
}
