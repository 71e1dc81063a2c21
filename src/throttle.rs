//! Fixed-count throttling for the feed driver.
//!
//! After every [`READINGS_PER_PAUSE`] reading sets the driver reports progress
//! and, when an interval is configured, sleeps for that interval. This is a
//! plain rate valve for the downstream consumer and does not adapt to load.

use std::time::Duration;

/// Number of processed reading sets between pauses.
pub const READINGS_PER_PAUSE: u64 = 1000;

/// Pauses the feed for a fixed interval every `every` reading sets.
#[derive(Debug, Clone)]
pub struct Throttle {
    every: u64,
    interval: Option<Duration>,
    pauses: u64,
}

impl Throttle {
    /// Create a throttle that pauses for `interval` every [`READINGS_PER_PAUSE`] readings.
    ///
    /// `None` or a zero interval disables the pause; progress is still reported.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use cr1000_relay::throttle::Throttle;
    ///
    /// let throttle = Throttle::new(Some(Duration::from_secs(3)));
    /// assert!(throttle.is_due(2000));
    /// ```
    pub fn new(interval: Option<Duration>) -> Self {
        Self::with_period(READINGS_PER_PAUSE, interval)
    }

    /// Create a throttle with a custom period. A period of zero is treated as one.
    pub fn with_period(every: u64, interval: Option<Duration>) -> Self {
        Throttle {
            every: every.max(1),
            interval: interval.filter(|d| !d.is_zero()),
            pauses: 0,
        }
    }

    /// Whether `processed` lands on a throttle boundary.
    pub fn is_due(&self, processed: u64) -> bool {
        processed > 0 && processed % self.every == 0
    }

    /// Sleep for the configured interval, if any.
    pub async fn pause(&mut self) {
        if let Some(interval) = self.interval {
            self.pauses += 1;
            tokio::time::sleep(interval).await;
        }
    }

    /// Number of pauses taken so far.
    pub fn pauses(&self) -> u64 {
        self.pauses
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

/// Parse a throttle interval.
///
/// A bare number is seconds. The suffixes `ms`, `s`, `m` and `h` are accepted.
///
/// # Examples
/// ```
/// use cr1000_relay::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let split = src
        .find(|c: char| !c.is_ascii_digit() && !c.is_whitespace())
        .unwrap_or(src.len());
    let (digits, unit) = src.split_at(split);
    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(amount)),
        "ms" => Ok(Duration::from_millis(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        other => Err(format!("unknown duration unit '{other}' in {src}")),
    }
}
