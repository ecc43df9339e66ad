// crates/flowcore-triggers/src/handlers/cron.rs
// ============================================================================
// Module: Cron Trigger Handler
// Description: Handler for cron-scheduled triggers, timezone-correct across
//              offset transitions.
// Purpose: Own next-fire computation for `TriggerKind::Cron` (spec.md
//          §4.9: "The cron handler owns timezone-correct next-fire
//          computation ... invalid IANA timezones are rejected at install
//          time").
// Dependencies: flowcore-model, cron, chrono, chrono-tz, tokio
// ============================================================================

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::core::time::Clock;
use flowcore_model::core::time::SystemClock;
use flowcore_model::core::trigger::TriggerConfig;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;
use tokio::task::JoinHandle;

use crate::error::TriggerError;
use crate::handler::FireCallback;
use crate::handler::TriggerHandler;

/// Handler for [`TriggerKind::Cron`].
///
/// # Invariants
/// - `install` validates both the cron expression and the IANA timezone
///   name before spawning a timer, rejecting either with a [`TriggerError`]
///   rather than installing a broken schedule.
pub struct CronHandler {
    tasks: Mutex<HashMap<TriggerId, JoinHandle<()>>>,
}

impl Default for CronHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronHandler {
    /// Creates an empty cron handler.
    #[must_use]
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }
}

/// Computes the delay in milliseconds until `schedule`'s next fire in `tz`,
/// reprojecting the candidate through the timezone so a DST gap does not
/// yield a time that never actually occurs on the wall clock.
fn next_fire_delay_ms(schedule: &Schedule, tz: Tz) -> Option<i64> {
    let now_in_tz = Utc::now().with_timezone(&tz);
    let candidate = schedule.after(&now_in_tz).next()?;
    let delay = candidate.with_timezone(&Utc) - Utc::now();
    Some(delay.num_milliseconds().max(0))
}

impl TriggerHandler for CronHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Cron
    }

    fn install(&self, trigger: &TriggerSpec, on_fire: FireCallback) -> Result<(), TriggerError> {
        let TriggerConfig::Cron { expression, timezone } = &trigger.config else {
            return Ok(());
        };
        let schedule = Schedule::from_str(expression).map_err(|err| TriggerError::InvalidCron(err.to_string()))?;
        let tz = Tz::from_str(timezone).map_err(|_| TriggerError::InvalidTimezone(timezone.clone()))?;

        let trigger_id = trigger.id.clone();
        let task = tokio::spawn(async move {
            loop {
                let Some(delay_ms) = next_fire_delay_ms(&schedule, tz) else {
                    break;
                };
                tokio::time::sleep(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0))).await;
                on_fire(trigger_id.clone(), TriggerFireContext {
                    trigger_id: trigger_id.clone(),
                    fired_at: SystemClock.now(),
                    source_tab_id: None,
                    source_page_id: None,
                });
            }
        });
        self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(trigger.id.clone(), task);
        Ok(())
    }

    fn uninstall(&self, trigger_id: &TriggerId) {
        if let Some(task) = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(trigger_id) {
            task.abort();
        }
    }

    fn uninstall_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}
