use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    error::{Backend, TurnError},
    store::Record,
};

const BACKENDS: [Backend; 3] = [Backend::Engine, Backend::Oracle, Backend::Validator];

fn record_key(backend: Backend) -> &'static str {
    match backend {
        Backend::Engine => "lastCall.engine",
        Backend::Oracle => "lastCall.oracle",
        Backend::Validator => "lastCall.validator",
    }
}

/// Enforces a minimum gap between calls to the same backend. Refuses instead of queuing.
///
/// Call times are wall-clock milliseconds kept in the state record, so the gap holds
/// across separate runs sharing one store.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: HashMap<Backend, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> RateLimiter {
        RateLimiter {
            min_interval,
            last_call: HashMap::new(),
        }
    }

    /// Merges the call times found in `record`, keeping the later one per backend.
    pub fn restore(&mut self, record: &Record) {
        for backend in BACKENDS {
            let Some(text) = record.get(record_key(backend)) else {
                continue;
            };
            let Some(at) = text
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
            else {
                debug!("ignoring unreadable {} '{text}'", record_key(backend));
                continue;
            };
            let last = self.last_call.entry(backend).or_insert(at);
            if at > *last {
                *last = at;
            }
        }
    }

    pub fn persist(&self, record: &mut Record) {
        for (backend, at) in &self.last_call {
            record.insert(
                record_key(*backend).to_string(),
                at.timestamp_millis().to_string(),
            );
        }
    }

    pub fn check(&self, backend: Backend, now: DateTime<Utc>) -> Result<(), TurnError> {
        let Some(last) = self.last_call.get(&backend) else {
            return Ok(());
        };
        // a clock that stepped backwards counts as no time passed
        let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
        if elapsed < self.min_interval {
            return Err(TurnError::RateLimited {
                backend,
                retry_after: self.min_interval - elapsed,
            });
        }
        Ok(())
    }

    /// Checks and, if allowed, records the call.
    pub fn acquire(&mut self, backend: Backend, now: DateTime<Utc>) -> Result<(), TurnError> {
        self.check(backend, now)?;
        self.last_call.insert(backend, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn second_call_inside_interval_is_refused() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let t0 = Utc::now();
        limiter.acquire(Backend::Engine, t0).unwrap();

        let err = limiter
            .acquire(Backend::Engine, t0 + TimeDelta::seconds(2))
            .unwrap_err();
        match err {
            TurnError::RateLimited {
                backend,
                retry_after,
            } => {
                assert_eq!(backend, Backend::Engine);
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("unexpected {other}"),
        }

        // a refused call does not move the window
        limiter
            .acquire(Backend::Engine, t0 + TimeDelta::seconds(5))
            .unwrap();
    }

    #[test]
    fn backends_are_limited_independently() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let t0 = Utc::now();
        limiter.acquire(Backend::Validator, t0).unwrap();
        limiter.acquire(Backend::Oracle, t0).unwrap();
        assert!(limiter.check(Backend::Engine, t0).is_ok());
        assert!(limiter.check(Backend::Oracle, t0).is_err());
    }

    #[test]
    fn zero_interval_never_limits() {
        let mut limiter = RateLimiter::new(Duration::ZERO);
        let t0 = Utc::now();
        limiter.acquire(Backend::Oracle, t0).unwrap();
        limiter.acquire(Backend::Oracle, t0).unwrap();
    }

    #[test]
    fn call_times_carry_over_through_the_record() {
        let t0 = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut first = RateLimiter::new(Duration::from_secs(5));
        first.acquire(Backend::Oracle, t0).unwrap();

        let mut record = Record::new();
        first.persist(&mut record);
        assert_eq!(record["lastCall.oracle"], "1700000000000");
        assert!(!record.contains_key("lastCall.engine"));

        let mut second = RateLimiter::new(Duration::from_secs(5));
        second.restore(&record);
        assert!(second.check(Backend::Oracle, t0 + TimeDelta::seconds(1)).is_err());
        assert!(second.check(Backend::Oracle, t0 + TimeDelta::seconds(5)).is_ok());
        assert!(second.check(Backend::Engine, t0).is_ok());
    }

    #[test]
    fn restore_keeps_the_later_call_and_skips_garbage() {
        let t0 = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        limiter.acquire(Backend::Engine, t0).unwrap();

        let mut record = Record::new();
        record.insert("lastCall.engine".into(), "1699999990000".into());
        record.insert("lastCall.validator".into(), "yesterday".into());
        limiter.restore(&record);

        assert!(limiter.check(Backend::Engine, t0 + TimeDelta::seconds(1)).is_err());
        assert!(limiter.check(Backend::Validator, t0).is_ok());
    }
}
