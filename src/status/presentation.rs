use serde::Serialize;

use super::resolver::ResolvedStatus;
use crate::domain::subsystems::StatusSource;

/// Badge shown next to an order's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub class: &'static str,
    pub icon: &'static str,
    pub label: String,
}

const UNKNOWN: (&str, &str) = ("badge-secondary", "fa-question-circle");

fn order_style(raw: &str) -> (&'static str, &'static str) {
    match raw {
        "pending_approval" => ("badge-warning", "fa-hourglass-start"),
        "pending" => ("badge-secondary", "fa-clock"),
        "in_progress" => ("badge-primary", "fa-cogs"),
        "ready_install" => ("badge-info", "fa-tools"),
        "completed" => ("badge-success", "fa-check-circle"),
        "delivered" => ("badge-success", "fa-truck"),
        "rejected" => ("badge-danger", "fa-ban"),
        "cancelled" => ("badge-danger", "fa-times-circle"),
        "manufacturing_deleted" => ("badge-dark", "fa-trash"),
        _ => UNKNOWN,
    }
}

fn manufacturing_style(raw: &str) -> (&'static str, &'static str) {
    match raw {
        "pending_approval" => ("badge-warning", "fa-hourglass-start"),
        "pending" => ("badge-secondary", "fa-clock"),
        "in_progress" => ("badge-primary", "fa-industry"),
        "ready_install" => ("badge-info", "fa-box"),
        "completed" => ("badge-success", "fa-check"),
        "delivered" => ("badge-success", "fa-truck"),
        "cancelled" => ("badge-danger", "fa-times"),
        _ => UNKNOWN,
    }
}

fn inspection_style(raw: &str) -> (&'static str, &'static str) {
    match raw {
        "pending" => ("badge-secondary", "fa-clock"),
        "scheduled" => ("badge-info", "fa-calendar"),
        "in_progress" => ("badge-primary", "fa-search"),
        "rescheduled" => ("badge-warning", "fa-calendar-alt"),
        "postponed_by_customer" => ("badge-warning", "fa-pause-circle"),
        "completed" => ("badge-success", "fa-clipboard-check"),
        "cancelled" => ("badge-danger", "fa-times"),
        _ => UNKNOWN,
    }
}

fn installation_style(raw: &str) -> (&'static str, &'static str) {
    match raw {
        "needs_scheduling" => ("badge-warning", "fa-calendar-plus"),
        "scheduled" => ("badge-info", "fa-calendar-check"),
        "rescheduled" => ("badge-warning", "fa-calendar-alt"),
        "in_installation" => ("badge-primary", "fa-tools"),
        "modification_required" => ("badge-danger", "fa-edit"),
        "completed" => ("badge-success", "fa-check-double"),
        "cancelled" => ("badge-danger", "fa-times"),
        _ => UNKNOWN,
    }
}

fn cutting_style(raw: &str) -> (&'static str, &'static str) {
    match raw {
        "pending" => ("badge-secondary", "fa-clock"),
        "in_progress" => ("badge-primary", "fa-cut"),
        "partially_completed" => ("badge-info", "fa-adjust"),
        "completed" => ("badge-success", "fa-check"),
        _ => UNKNOWN,
    }
}

fn label(raw: &str) -> String {
    raw.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Badge for a raw status value of `source`. Total: values no table knows
/// get a neutral badge.
pub fn badge(source: StatusSource, raw: &str) -> Badge {
    let (class, icon) = match source {
        StatusSource::OrderOwn => order_style(raw),
        StatusSource::Manufacturing => manufacturing_style(raw),
        StatusSource::Inspection => inspection_style(raw),
        StatusSource::Installation => installation_style(raw),
        StatusSource::Cutting => cutting_style(raw),
    };
    let label = if raw.trim().is_empty() { "Unknown".to_string() } else { label(raw) };
    Badge { class, icon, label }
}

impl ResolvedStatus {
    pub fn badge(&self) -> Badge {
        badge(self.source, self.subsystem_status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::LifecycleStatus;
    use crate::domain::subsystems::{
        CuttingStatus, InspectionStatus, InstallationStatus, ManufacturingStatus,
    };

    #[test]
    fn test_every_known_status_has_a_specific_badge() {
        for status in LifecycleStatus::ALL {
            assert_ne!(badge(StatusSource::OrderOwn, status.as_str()).icon, UNKNOWN.1, "{status}");
        }
        for status in ManufacturingStatus::ALL {
            assert_ne!(badge(StatusSource::Manufacturing, status.as_str()).icon, UNKNOWN.1, "{status}");
        }
        for status in InspectionStatus::ALL {
            assert_ne!(badge(StatusSource::Inspection, status.as_str()).icon, UNKNOWN.1, "{status}");
        }
        for status in InstallationStatus::ALL {
            assert_ne!(badge(StatusSource::Installation, status.as_str()).icon, UNKNOWN.1, "{status}");
        }
        for status in CuttingStatus::ALL {
            assert_ne!(badge(StatusSource::Cutting, status.as_str()).icon, UNKNOWN.1, "{status}");
        }
    }

    #[test]
    fn test_unknown_value_gets_default_badge() {
        let unknown = badge(StatusSource::Installation, "teleported");
        assert_eq!(unknown.class, "badge-secondary");
        assert_eq!(unknown.icon, "fa-question-circle");
        assert_eq!(unknown.label, "Teleported");

        assert_eq!(badge(StatusSource::Cutting, "").label, "Unknown");
    }

    #[test]
    fn test_label_is_title_cased() {
        assert_eq!(badge(StatusSource::Inspection, "postponed_by_customer").label, "Postponed By Customer");
    }
}
