//! Hardware-bound profile validation
//!
//! Every violation is collected; nothing short-circuits.

use apu_protocol::{HardwareLimits, LimitRange, Profile};
use regex::RegexBuilder;

fn check_range(field: &str, value: Option<u32>, range: LimitRange, errors: &mut Vec<String>) {
    let Some(value) = value else { return };
    if range.contains(value) {
        return;
    }
    if value < range.min {
        errors.push(format!("{} must be at least {} (got {})", field, range.min, value));
    } else {
        errors.push(format!("{} must be at most {} (got {})", field, range.max, value));
    }
}

fn check_order(prefix: &str, min: Option<u32>, max: Option<u32>, errors: &mut Vec<String>) {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            errors.push(format!(
                "{prefix}.min must be less than or equal to {prefix}.max ({min} > {max})"
            ));
        }
    }
}

pub fn validate_profile(profile: &Profile, limits: &HardwareLimits) -> Vec<String> {
    let mut errors = Vec::new();

    check_range("power.stapm", profile.power.stapm, limits.stapm, &mut errors);
    check_range("power.slow", profile.power.slow, limits.slow, &mut errors);
    check_range("power.fast", profile.power.fast, limits.fast, &mut errors);

    check_range("cpuClock.min", profile.cpu_clock.min, limits.cpu_clock, &mut errors);
    check_range("cpuClock.max", profile.cpu_clock.max, limits.cpu_clock, &mut errors);
    check_order("cpuClock", profile.cpu_clock.min, profile.cpu_clock.max, &mut errors);

    check_range("gpuClock.min", profile.gpu_clock.min, limits.gpu_clock, &mut errors);
    check_range("gpuClock.max", profile.gpu_clock.max, limits.gpu_clock, &mut errors);
    check_order("gpuClock", profile.gpu_clock.min, profile.gpu_clock.max, &mut errors);

    for (i, pattern) in profile.match_rule.patterns.iter().enumerate() {
        if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
            errors.push(format!("match.patterns[{}] is not a valid regular expression: {}", i, e));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use apu_protocol::{ClockRange, GpuClock, PowerLimits};

    fn profile() -> Profile {
        Profile::passthrough("test")
    }

    #[test]
    fn test_values_inside_limits_pass() {
        let limits = HardwareLimits::default();
        let mut p = profile();
        p.power = PowerLimits { stapm: Some(limits.stapm.min), slow: Some(30_000), fast: Some(limits.fast.max) };
        p.cpu_clock = ClockRange { min: Some(1_000), max: Some(4_000) };
        p.gpu_clock = GpuClock { min: Some(limits.gpu_clock.min), max: Some(limits.gpu_clock.max), perf_level: None };
        p.match_rule.patterns = vec!["steam".into(), r"^/usr/bin/game\b".into()];
        assert!(validate_profile(&p, &limits).is_empty());
    }

    #[test]
    fn test_out_of_bounds_values_name_the_field() {
        let limits = HardwareLimits::default();
        let mut p = profile();
        p.power.stapm = Some(limits.stapm.max + 1);
        p.cpu_clock.min = Some(limits.cpu_clock.min - 1);
        p.gpu_clock.max = Some(limits.gpu_clock.max + 100);

        let errors = validate_profile(&p, &limits);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.starts_with("power.stapm")));
        assert!(errors.iter().any(|e| e.starts_with("cpuClock.min")));
        assert!(errors.iter().any(|e| e.starts_with("gpuClock.max")));
    }

    #[test]
    fn test_min_above_max_yields_exactly_one_order_error() {
        let limits = HardwareLimits::default();
        let mut p = profile();
        p.cpu_clock = ClockRange { min: Some(3_000), max: Some(2_000) };
        let errors = validate_profile(&p, &limits);
        let order: Vec<_> = errors.iter().filter(|e| e.contains("must be less than or equal to")).collect();
        assert_eq!(order.len(), 1);
        assert!(order[0].starts_with("cpuClock.min"));

        let mut p = profile();
        p.gpu_clock = GpuClock { min: Some(1_500), max: Some(800), perf_level: None };
        let errors = validate_profile(&p, &limits);
        assert_eq!(errors.iter().filter(|e| e.contains("must be less than or equal to")).count(), 1);
    }

    #[test]
    fn test_collects_all_violations_including_bad_regex() {
        let limits = HardwareLimits::default();
        let mut p = profile();
        p.power.fast = Some(1);
        p.match_rule.patterns = vec!["ok".into(), "(unclosed".into()];
        let errors = validate_profile(&p, &limits);
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("match.patterns[1]"));
    }

    #[test]
    fn test_limits_are_inclusive_and_configurable() {
        let mut limits = HardwareLimits::default();
        limits.stapm = LimitRange::new(10_000, 15_000);
        let mut p = profile();
        p.power.stapm = Some(15_000);
        assert!(validate_profile(&p, &limits).is_empty());
        p.power.stapm = Some(20_000);
        assert_eq!(validate_profile(&p, &limits).len(), 1);
    }
}
