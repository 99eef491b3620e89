//! Execution Timeline
//!
//! Tracks step start/end times for run summaries and ASCII Gantt charts.
//! A timeline can be recorded live or rebuilt from persisted step records,
//! which is what a run summary does so resumed runs show every attempt.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::state::{StepRecord, StepStatus};

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step completed successfully
    Completed,
    /// Step failed
    Failed,
    /// Step paused for a human
    Paused,
    /// Step's branch was not taken
    Skipped,
}

impl EventType {
    fn ends_step(&self) -> bool {
        !matches!(self, EventType::Started)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Node ID of the step
    pub step_id: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: DateTime<Utc>,
}

impl ExecutionTimeline {
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            start_time,
        }
    }

    /// Rebuilds a timeline from step records.
    pub fn from_steps(steps: &[StepRecord]) -> Self {
        let start = steps
            .iter()
            .filter_map(|s| s.started_at)
            .min()
            .unwrap_or_else(Utc::now);
        let mut timeline = Self::starting_at(start);

        for step in steps {
            if let Some(started) = step.started_at {
                timeline.add_event_at(step.node_id.clone(), EventType::Started, started);
            }

            let end_event = match step.status {
                StepStatus::Completed => Some(EventType::Completed),
                StepStatus::Failed => Some(EventType::Failed),
                StepStatus::Skipped => Some(EventType::Skipped),
                StepStatus::Waiting => Some(EventType::Paused),
                StepStatus::Pending | StepStatus::Running => None,
            };
            let end_time = match step.status {
                StepStatus::Waiting => step.pause_reason.as_ref().map(|r| r.timestamp),
                _ => step.completed_at,
            };

            if let (Some(event), Some(at)) = (end_event, end_time) {
                timeline.add_event_at(step.node_id.clone(), event, at);
            }
        }

        timeline.events.sort_by_key(|e| e.timestamp);
        timeline
    }

    fn add_event_at(&mut self, step_id: String, event_type: EventType, timestamp: DateTime<Utc>) {
        self.events.push(TimelineEvent {
            step_id,
            event_type,
            timestamp,
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    fn offset_ms(&self, at: DateTime<Utc>) -> i64 {
        (at - self.start_time).num_milliseconds().max(0)
    }

    /// Milliseconds from the start to the last recorded event.
    pub fn span_ms(&self) -> i64 {
        self.events
            .iter()
            .map(|e| self.offset_ms(e.timestamp))
            .max()
            .unwrap_or(0)
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each step is shown as a bar indicating when it ran
    /// relative to the total execution time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.span_ms();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut step_times: HashMap<String, (i64, i64)> = HashMap::new();
        for event in &self.events {
            let elapsed = self.offset_ms(event.timestamp);
            if event.event_type.ends_step() {
                if let Some(times) = step_times.get_mut(&event.step_id) {
                    times.1 = elapsed;
                }
            } else {
                step_times
                    .entry(event.step_id.clone())
                    .or_insert((elapsed, 0))
                    .0 = elapsed;
            }
        }

        // Sort by start time
        let mut sorted_steps: Vec<_> = step_times.into_iter().collect();
        sorted_steps.sort_by_key(|(_, (start, _))| *start);

        for (step_id, (start, end)) in sorted_steps {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let duration = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(duration));

                output.push_str(&format!(
                    "{:12} |{}| ({} ms)\n",
                    truncate(&step_id, 12),
                    bar,
                    end - start
                ));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns step durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, i64> {
        let mut starts: HashMap<String, i64> = HashMap::new();
        let mut durations: HashMap<String, i64> = HashMap::new();

        for event in &self.events {
            let elapsed = self.offset_ms(event.timestamp);
            if event.event_type.ends_step() {
                if let Some(start) = starts.get(&event.step_id) {
                    durations.insert(event.step_id.clone(), elapsed - start);
                }
            } else {
                starts.insert(event.step_id.clone(), elapsed);
            }
        }

        durations
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
