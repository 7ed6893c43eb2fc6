use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One (target, cron pattern) pair in the control-plane schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    /// Route name invoked when the pattern matches, e.g. `worker`
    pub target: String,
    /// Minute pattern, see [`minute_matches`]
    pub pattern: String,
}

impl ScheduleEntry {
    fn new(target: &str, pattern: &str) -> Self {
        Self {
            target: target.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// The default control-plane schedule: hourly discovery, worker every two
/// minutes, maintenance every fifteen, monitor every thirty.
pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new("discover-artists", "0 * * * *"),
        ScheduleEntry::new("worker", "*/2 * * * *"),
        ScheduleEntry::new("maintenance", "*/15 * * * *"),
        ScheduleEntry::new("monitor", "*/30 * * * *"),
    ]
}

/// Evaluates the supported cron subset against a wall-clock minute.
///
/// Supported patterns: `* * * * *` (every minute), `*/N * * * *` (minutes
/// divisible by N), and an exact minute when the pattern begins with
/// digits followed by whitespace. Anything else never fires.
pub fn minute_matches(pattern: &str, minute: u32) -> bool {
    if pattern == "* * * * *" {
        return true;
    }

    if let Some(rest) = pattern.strip_prefix("*/") {
        let step = rest.split_whitespace().next().unwrap_or("");
        return matches!(step.parse::<u32>(), Ok(n) if n > 0 && minute % n == 0);
    }

    if pattern.starts_with(|c: char| c.is_ascii_digit()) {
        if let Some((head, _)) = pattern.split_once(char::is_whitespace) {
            if head.chars().all(|c| c.is_ascii_digit()) {
                return matches!(head.parse::<u32>(), Ok(m) if m == minute);
            }
        }
    }

    false
}

/// Fire-and-forget invoker for the internal HTTP surface.
pub struct Invoker {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl Invoker {
    /// Creates an invoker posting to `base_url`, optionally authenticated.
    pub fn new(base_url: String, bearer_token: Option<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            bearer_token,
        })
    }

    /// POSTs the target's route once. No retries at this layer; the cron
    /// tick itself is the retry.
    pub async fn invoke(&self, target: &str) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), target);
        let mut request = self.client.post(&url).json(&serde_json::json!({}));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Periodic control plane: invoked once a minute from outside, fires the
/// targets whose pattern matches the current minute.
pub struct Scheduler {
    invoker: Arc<Invoker>,
    schedule: Vec<ScheduleEntry>,
}

impl Scheduler {
    /// Creates a scheduler over the default schedule.
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self {
            invoker,
            schedule: default_schedule(),
        }
    }

    /// Replaces the schedule table.
    pub fn with_schedule(mut self, schedule: Vec<ScheduleEntry>) -> Self {
        self.schedule = schedule;
        self
    }

    /// One scheduler tick: fires every matching target and returns their
    /// names. Invocations are spawned fire-and-forget; a failure is logged
    /// and the next matching tick retries.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let minute = now.minute();
        let mut fired = Vec::new();

        for entry in &self.schedule {
            if !minute_matches(&entry.pattern, minute) {
                continue;
            }

            fired.push(entry.target.clone());
            let invoker = self.invoker.clone();
            let target = entry.target.clone();
            tokio::spawn(async move {
                if let Err(error) = invoker.invoke(&target).await {
                    warn!(%target, %error, "scheduled invocation failed");
                }
            });
        }

        info!(minute, fired = fired.len(), "scheduler tick");
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_minute_pattern_always_fires() {
        for minute in 0..60 {
            assert!(minute_matches("* * * * *", minute));
        }
    }

    #[test]
    fn step_patterns_fire_on_divisible_minutes() {
        let fired: Vec<u32> = (0..60).filter(|m| minute_matches("*/2 * * * *", *m)).collect();
        assert_eq!(fired, (0..60).step_by(2).collect::<Vec<_>>());

        let fired: Vec<u32> = (0..60)
            .filter(|m| minute_matches("*/15 * * * *", *m))
            .collect();
        assert_eq!(fired, vec![0, 15, 30, 45]);
    }

    #[test]
    fn exact_minute_patterns_fire_once_per_hour() {
        let fired: Vec<u32> = (0..60).filter(|m| minute_matches("0 * * * *", *m)).collect();
        assert_eq!(fired, vec![0]);

        assert!(minute_matches("37 * * * *", 37));
        assert!(!minute_matches("37 * * * *", 38));
    }

    #[test]
    fn unsupported_patterns_never_fire() {
        for minute in 0..60 {
            assert!(!minute_matches("xyz", minute));
            assert!(!minute_matches("*/0 * * * *", minute));
            assert!(!minute_matches("5-10 * * * *", minute));
            assert!(!minute_matches("5", minute));
        }
    }
}
