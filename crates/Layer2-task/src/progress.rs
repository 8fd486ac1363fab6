//! Progress parsing from external tool output
//!
//! 출력 한 줄에서 진행률을 추출한다. 패턴은 순서대로 시도하고 첫 매칭만 사용:
//! 1. `NN%`
//! 2. `cur/total` (total > 0)
//! 3. `Progress: NN`

use odmq_foundation::{Error, Result};
use regex::Regex;

/// Ordered progress heuristics
#[derive(Debug, Clone)]
pub struct ProgressParser {
    percent: Regex,
    fraction: Regex,
    explicit: Regex,
}

impl ProgressParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Internal(format!("Invalid progress pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            percent: compile(r"(\d+)%")?,
            fraction: compile(r"(\d+)/(\d+)")?,
            explicit: compile(r"Progress: (\d+)")?,
        })
    }

    /// Parse a progress value (0-100) from one output line
    pub fn parse(&self, line: &str) -> Option<u8> {
        if let Some(caps) = self.percent.captures(line) {
            return caps.get(1).and_then(|m| parse_clamped(m.as_str()));
        }

        if let Some(caps) = self.fraction.captures(line) {
            let current: u64 = caps.get(1)?.as_str().parse().ok()?;
            let total: u64 = caps.get(2)?.as_str().parse().ok()?;
            if total == 0 {
                return None;
            }
            let pct = current.saturating_mul(100) / total;
            return Some(pct.min(100) as u8);
        }

        if let Some(caps) = self.explicit.captures(line) {
            return caps.get(1).and_then(|m| parse_clamped(m.as_str()));
        }

        None
    }
}

fn parse_clamped(digits: &str) -> Option<u8> {
    // 자릿수가 너무 길면 u64 파싱이 실패하므로 100으로 본다
    let value = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some(value.min(100) as u8)
}

/// Monotonic progress accumulator
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    current: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed value and return the effective (never decreasing) progress
    pub fn record(&mut self, value: u8) -> u8 {
        self.current = self.current.max(value.min(100));
        self.current
    }

    pub fn current(&self) -> u8 {
        self.current
    }
}
