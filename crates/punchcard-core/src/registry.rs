//! Attendance registry: the set of known employees and their ledgers.

use crate::employee::{Employee, PunchKind, RepeatPunchPolicy};
use crate::notify::{PunchEvent, PunchNotifier};
use crate::report::{self, ReportError, ReportRow};
use crate::timer::Timer;
use chrono::NaiveDate;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry handle shared between the recognition consumer and shutdown.
pub type SharedRegistry = Arc<Mutex<AttendanceRegistry>>;

/// Collapse reference-image labels onto one identity: "alice_01" → "alice".
pub fn normalize_key(raw: &str) -> &str {
    raw.split_once('_').map_or(raw, |(prefix, _)| prefix)
}

/// Known employees in registration order.
#[derive(Default)]
pub struct AttendanceRegistry {
    employees: IndexMap<String, Employee>,
    policy: RepeatPunchPolicy,
    notifiers: Vec<Box<dyn PunchNotifier>>,
}

impl AttendanceRegistry {
    pub fn new(policy: RepeatPunchPolicy) -> Self {
        Self {
            employees: IndexMap::new(),
            policy,
            notifiers: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn add_notifier(&mut self, notifier: impl PunchNotifier + 'static) {
        self.notifiers.push(Box::new(notifier));
    }

    /// Register an employee, discarding any history already recorded under
    /// the same normalized name. The registration position is kept.
    pub fn add_employee(&mut self, raw_name: &str) {
        let name = normalize_key(raw_name);
        if self
            .employees
            .insert(name.to_string(), Employee::new(name))
            .is_some()
        {
            tracing::debug!(employee = name, "employee re-registered; history reset");
        }
    }

    /// Same as [`add_employee`](Self::add_employee), named for call sites
    /// that reset on purpose.
    pub fn reset_employee(&mut self, raw_name: &str) {
        self.add_employee(raw_name);
    }

    /// Register an employee unless the normalized name is already known.
    /// Returns true if a new employee was created.
    pub fn add_employee_if_absent(&mut self, raw_name: &str) -> bool {
        let name = normalize_key(raw_name);
        if self.employees.contains_key(name) {
            return false;
        }
        self.employees.insert(name.to_string(), Employee::new(name));
        true
    }

    pub fn is_known_employee(&self, raw_name: &str) -> bool {
        self.employees.contains_key(normalize_key(raw_name))
    }

    pub fn employee(&self, raw_name: &str) -> Option<&Employee> {
        self.employees.get(normalize_key(raw_name))
    }

    pub fn employees(&self) -> impl Iterator<Item = &Employee> {
        self.employees.values()
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    /// Apply a punch for a recognized label. Unknown labels are ignored and
    /// return `None`.
    pub fn record_punch(&mut self, raw_name: &str, now: Timer, today: NaiveDate) -> Option<PunchKind> {
        let name = normalize_key(raw_name);
        let employee = self.employees.get_mut(name)?;
        let kind = employee.record_punch(now, today, self.policy);

        let event = PunchEvent {
            employee: name.to_string(),
            date: today,
            time: now,
            kind,
        };
        for notifier in &self.notifiers {
            notifier.notify(&event);
        }

        Some(kind)
    }

    /// Every employee's rows, in registration order.
    pub fn generate_report(&self) -> Vec<ReportRow> {
        self.employees
            .values()
            .flat_map(Employee::to_report_rows)
            .collect()
    }

    /// Export the report as CSV into `dir`, named after its date span.
    pub fn export_report(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        report::export_csv(&self.generate_report(), dir)
    }
}
