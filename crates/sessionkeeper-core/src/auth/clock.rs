use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio's clock instead of the system's.
///
/// Under `tokio::time::pause()` it only moves when the runtime's virtual time
/// moves, so expiry checks and timer deadlines stay in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.anchor + Duration::milliseconds(elapsed.as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_virtual_time() {
        let anchor = Utc::now();
        let clock = TokioClock::new(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), anchor + Duration::seconds(90));
    }
}
