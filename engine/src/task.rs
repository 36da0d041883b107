//! Typed view over documents in the `tasks` collection.

use crate::{
    error::Result, recurrence::RecurrencePattern, Error, Fields, Timestamp, Validator,
};
use chrono::{DateTime, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Collection holding garden tasks.
pub const TASKS: &str = "tasks";

/// Key older clients stored the recurrence pattern under.
pub const LEGACY_RECURRENCE_FIELD: &str = "recurrencePattern";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Planting,
    Watering,
    Harvesting,
    Maintenance,
    #[default]
    General,
}

/// A garden task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_planting_id: Option<String>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default, alias = "recurrencePattern", skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrencePattern>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date: None,
            completed: false,
            completed_at: None,
            priority: Priority::default(),
            category: Category::default(),
            related_planting_id: None,
            recurring: false,
            recurrence: None,
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    pub fn repeating(mut self, pattern: RecurrencePattern) -> Self {
        self.recurring = true;
        self.recurrence = Some(pattern);
        self
    }

    /// Read a task out of document fields.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(fields.clone()))
            .map_err(|e| Error::validation(TASKS, e.to_string()))
    }

    pub fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Fields::new(),
        }
    }

    /// Write this task over `fields`, keeping keys it does not own.
    ///
    /// A legacy recurrence key is dropped so the result reads back.
    pub fn write_into(&self, fields: &mut Fields) {
        fields.remove(LEGACY_RECURRENCE_FIELD);
        fields.extend(self.to_fields());
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation(TASKS, "title is required"));
        }
        if self.recurring && self.recurrence.is_none() {
            return Err(Error::validation(
                TASKS,
                "recurring tasks need a recurrence pattern",
            ));
        }
        Ok(())
    }

    /// Mark the task done at `now` and return its next occurrence, if any.
    pub fn complete(&mut self, now: Timestamp) -> Option<Task> {
        self.completed = true;
        self.completed_at = Some(now);

        let pattern = self.recurrence?;
        next_occurrence(self, &pattern)
    }

    pub fn reopen(&mut self) {
        self.completed = false;
        self.completed_at = None;
    }
}

/// The next instance of a recurring task.
///
/// Advances from the due date, or from the completion date when the task has
/// none. Returns `None` for non-recurring tasks or when there is no date to
/// advance from.
pub fn next_occurrence(task: &Task, pattern: &RecurrencePattern) -> Option<Task> {
    if !task.recurring {
        return None;
    }

    let base = task.due_date.or_else(|| {
        let completed_at = i64::try_from(task.completed_at?).ok()?;
        DateTime::from_timestamp_millis(completed_at).map(|at| at.date_naive())
    })?;

    Some(Task {
        due_date: Some(pattern.next_date(base)?),
        completed: false,
        completed_at: None,
        recurrence: Some(*pattern),
        ..task.clone()
    })
}

/// When a templated task falls due relative to its planting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimingType {
    /// Once, `timing` days after planting
    #[default]
    DaysAfterPlanting,
    /// Every `timing` days, starting on the planting date
    Recurring,
}

/// Per-plant blueprint for generated tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timing_type: TimingType,
    #[serde(default)]
    pub timing: u32,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskTemplate {
    /// Instantiate the template for a planting made on `planted_on`.
    pub fn generate_task(&self, planted_on: NaiveDate, planting_id: &str) -> Result<Task> {
        let (due_date, recurrence) = match self.timing_type {
            TimingType::DaysAfterPlanting => {
                let due = planted_on
                    .checked_add_days(Days::new(self.timing.into()))
                    .ok_or_else(|| Error::validation(TASKS, "due date out of range"))?;
                (due, None)
            }
            TimingType::Recurring => (planted_on, Some(RecurrencePattern::days(self.timing)?)),
        };

        let task = Task {
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: Some(due_date),
            completed: false,
            completed_at: None,
            priority: self.priority,
            category: self.category,
            related_planting_id: Some(planting_id.to_string()),
            recurring: recurrence.is_some(),
            recurrence,
        };
        task.validate()?;
        Ok(task)
    }
}

/// [`Validator`] for the `tasks` collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRules;

impl Validator for TaskRules {
    fn validate(&self, collection: &str, fields: &Fields) -> Result<()> {
        if collection != TASKS {
            return Ok(());
        }
        Task::from_fields(fields)?.validate()
    }
}
