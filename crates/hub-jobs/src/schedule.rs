use std::str::FromStr;
use std::time::Duration;

/// A cron expression used for `submit`'s optional recurring `schedule`.
/// Clock skew of up to one minute is tolerated: we simply clamp a
/// negative or zero until-next delay up to that tolerance instead of
/// busy-looping.
#[derive(Clone)]
pub struct CronSchedule {
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        Ok(Self {
            schedule: cron::Schedule::from_str(expr)?,
        })
    }

    /// A future that resolves at (or shortly after) the next scheduled
    /// occurrence.
    pub fn sleep_until_next(&self) -> tokio::time::Sleep {
        let now = chrono::Utc::now();
        let next = self
            .schedule
            .after(&now)
            .next()
            .unwrap_or(now + chrono::Duration::minutes(1));
        let millis = (next - now).num_milliseconds().max(0) as u64;
        tokio::time::sleep(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_cron_expression() {
        // `cron`'s format includes a leading seconds field.
        assert!(CronSchedule::parse("0 0 * * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(CronSchedule::parse("not a cron expr").is_err());
    }
}
