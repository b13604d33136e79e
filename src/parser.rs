/// Probe output parsing: turn one line of `ping` output into a latency sample.
///
/// Looks for a token like `time=12.3ms` or `time=12.3 ms` anywhere in the line.
/// Lines without that token (e.g. `Request timeout for icmp_seq 4`) yield
/// [`Sample::Unresolved`] rather than an error.
use regex::Regex;
use std::sync::LazyLock;

/// Compiled latency token pattern.
static LATENCY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+(?:\.\d+)?)\s*ms").unwrap());

/// One parsed observation from probe output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Round-trip latency in milliseconds.
    Latency(f64),
    /// The line carried no recognizable latency token.
    Unresolved,
}

/// Parse a single line of probe output.
pub fn parse_line(line: &str) -> Sample {
    LATENCY_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map_or(Sample::Unresolved, Sample::Latency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_token() {
        assert_eq!(parse_line("time=12.3ms"), Sample::Latency(12.3));
    }

    #[test]
    fn test_parse_token_with_space_before_unit() {
        assert_eq!(parse_line("time=12.3 ms"), Sample::Latency(12.3));
    }

    #[test]
    fn test_parse_full_ping_line() {
        assert_eq!(
            parse_line("64 bytes from 1.1.1.1: icmp_seq=1 ttl=59 time=12.3 ms"),
            Sample::Latency(12.3)
        );
    }

    #[test]
    fn test_parse_integer_latency() {
        assert_eq!(
            parse_line("64 bytes from 10.0.0.1: icmp_seq=7 ttl=64 time=4 ms"),
            Sample::Latency(4.0)
        );
    }

    #[test]
    fn test_parse_many_spaces_before_unit() {
        assert_eq!(parse_line("time=0.045    ms"), Sample::Latency(0.045));
    }

    #[test]
    fn test_request_timeout_is_unresolved() {
        assert_eq!(
            parse_line("Request timeout for icmp_seq 4"),
            Sample::Unresolved
        );
    }

    #[test]
    fn test_header_line_is_unresolved() {
        assert_eq!(
            parse_line("PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data."),
            Sample::Unresolved
        );
    }

    #[test]
    fn test_empty_line_is_unresolved() {
        assert_eq!(parse_line(""), Sample::Unresolved);
    }

    #[test]
    fn test_malformed_token_is_unresolved() {
        assert_eq!(parse_line("time=abc ms"), Sample::Unresolved);
        assert_eq!(parse_line("time=12.3"), Sample::Unresolved);
        assert_eq!(parse_line("time=.5ms"), Sample::Unresolved);
    }

    #[test]
    fn test_first_token_wins() {
        assert_eq!(
            parse_line("time=1.5ms then time=9.9ms"),
            Sample::Latency(1.5)
        );
    }
}
