//! Resource limit parsing.
//!
//! CPU limits arrive as fractional cores and are converted to the runtime's
//! nano-CPU unit; memory limits arrive as human strings ("512m", "2g", bare
//! bytes) with a fixed power-of-1024 unit table. An unparseable or
//! non-positive value means "no limit", never an error.

/// Parse a human memory string into bytes.
///
/// Recognized suffixes: `k`, `m`, `g`, `t` (powers of 1024, case
/// insensitive); no suffix means bytes. Returns `None` for anything
/// unparseable or non-positive.
pub fn parse_memory_limit(input: &str) -> Option<u64> {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return None;
    }

    let (number, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024u64.pow(2)),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024u64.pow(3)),
        Some('t') => (&trimmed[..trimmed.len() - 1], 1024u64.pow(4)),
        _ => (trimmed.as_str(), 1),
    };

    let value: f64 = number.parse().ok()?;
    if !(value > 0.0) || !value.is_finite() {
        return None;
    }

    let bytes = (value * multiplier as f64) as u64;
    if bytes == 0 { None } else { Some(bytes) }
}

/// Convert fractional cores to the runtime's nano-CPU unit.
/// Non-positive values mean "no limit".
pub fn cpu_nanos(cores: f64) -> Option<i64> {
    if !(cores > 0.0) || !cores.is_finite() {
        return None;
    }
    Some((cores * 1_000_000_000.0) as i64)
}

/// Render a CPU limit for the runtime CLI, round-tripped through the
/// nano-CPU unit so both interfaces agree on the granularity.
pub(crate) fn cpus_arg(cores: f64) -> Option<String> {
    cpu_nanos(cores).map(|nanos| {
        let cores = nanos as f64 / 1_000_000_000.0;
        format!("{cores}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_unit_table() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1k"), Some(1024));
        assert_eq!(parse_memory_limit("1t"), Some(1024u64.pow(4)));
        assert_eq!(parse_memory_limit("1048576"), Some(1024 * 1024));
        assert_eq!(parse_memory_limit("512M"), Some(512 * 1024 * 1024));
    }

    #[test]
    fn test_memory_no_limit_cases() {
        assert_eq!(parse_memory_limit("0"), None);
        assert_eq!(parse_memory_limit("-5m"), None);
        assert_eq!(parse_memory_limit("lots"), None);
        assert_eq!(parse_memory_limit(""), None);
        assert_eq!(parse_memory_limit("m"), None);
    }

    #[test]
    fn test_cpu_nanos() {
        assert_eq!(cpu_nanos(1.5), Some(1_500_000_000));
        assert_eq!(cpu_nanos(2.0), Some(2_000_000_000));
        assert_eq!(cpu_nanos(0.0), None);
        assert_eq!(cpu_nanos(-1.0), None);
    }

    #[test]
    fn test_cpus_arg_rendering() {
        assert_eq!(cpus_arg(1.5).as_deref(), Some("1.5"));
        assert_eq!(cpus_arg(2.0).as_deref(), Some("2"));
        assert_eq!(cpus_arg(0.0), None);
    }
}
