use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::parse_cron;
use crate::EventStream;
use crate::Result;
use crate::Ring;
use crate::ValidationError;

/// A named recurring job over the items of a ring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    /// Items delivered per trigger
    pub items: i64,
    /// Seconds between triggers; exclusive with `cron_schedule`
    #[serde(default)]
    pub interval_schedule: i64,
    /// Cron expression; exclusive with `interval_schedule`
    #[serde(default)]
    pub cron_schedule: String,
}

impl Subscription {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.items <= 0 {
            return Err(ValidationError::InvalidItems(self.items));
        }

        let has_interval = self.interval_schedule > 0;
        let has_cron = !self.cron_schedule.trim().is_empty();
        match (has_interval, has_cron) {
            (true, true) => Err(ValidationError::ConflictingSchedules),
            (false, false) => Err(ValidationError::MissingSchedule),
            (false, true) => parse_cron(&self.cron_schedule).map(|_| ()),
            (true, false) => Ok(()),
        }
    }

    /// Validates the subscription and starts watching `ring` with it.
    pub fn watch(
        &self,
        ring: &dyn Ring,
        ctx: &CancellationToken,
    ) -> Result<EventStream> {
        self.validate()?;
        Ok(ring.watch(
            ctx,
            &self.name,
            self.items as usize,
            self.interval_schedule,
            self.cron_schedule.trim(),
        ))
    }
}
