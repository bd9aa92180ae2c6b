use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::order::LifecycleStatus;

/// Raw status string that matched no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {vocabulary} status: {value}")]
pub struct UnknownStatus {
    pub vocabulary: &'static str,
    pub value: String,
}

macro_rules! status_vocabulary {
    ($name:ident, $vocabulary:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownStatus {
                        vocabulary: $vocabulary,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_vocabulary!(InspectionStatus, "inspection", {
    Pending => "pending",
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Rescheduled => "rescheduled",
    PostponedByCustomer => "postponed_by_customer",
    Completed => "completed",
    Cancelled => "cancelled",
});

status_vocabulary!(InstallationStatus, "installation", {
    NeedsScheduling => "needs_scheduling",
    Scheduled => "scheduled",
    Rescheduled => "rescheduled",
    InInstallation => "in_installation",
    ModificationRequired => "modification_required",
    Completed => "completed",
    Cancelled => "cancelled",
});

status_vocabulary!(ManufacturingStatus, "manufacturing", {
    PendingApproval => "pending_approval",
    Pending => "pending",
    InProgress => "in_progress",
    ReadyInstall => "ready_install",
    Completed => "completed",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

status_vocabulary!(CuttingStatus, "cutting", {
    Pending => "pending",
    InProgress => "in_progress",
    PartiallyCompleted => "partially_completed",
    Completed => "completed",
});

impl ManufacturingStatus {
    /// Installation takes over once manufacturing reaches one of these.
    pub fn hands_over_to_installation(&self) -> bool {
        matches!(
            self,
            ManufacturingStatus::ReadyInstall
                | ManufacturingStatus::Completed
                | ManufacturingStatus::Delivered
        )
    }
}

impl CuttingStatus {
    /// A line item is mid-cutting while in one of these.
    pub fn is_active(&self) -> bool {
        matches!(self, CuttingStatus::InProgress | CuttingStatus::PartiallyCompleted)
    }
}

/// Which subsystem an authoritative status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Cutting,
    Manufacturing,
    Inspection,
    Installation,
    OrderOwn,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Cutting => "cutting",
            StatusSource::Manufacturing => "manufacturing",
            StatusSource::Inspection => "inspection",
            StatusSource::Installation => "installation",
            StatusSource::OrderOwn => "order",
        }
    }
}

impl fmt::Display for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status value tagged with the vocabulary it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "status", rename_all = "snake_case")]
pub enum SubsystemStatus {
    Inspection(InspectionStatus),
    Installation(InstallationStatus),
    Manufacturing(ManufacturingStatus),
    Cutting(CuttingStatus),
    OrderOwn(LifecycleStatus),
}

impl SubsystemStatus {
    pub fn source(&self) -> StatusSource {
        match self {
            SubsystemStatus::Inspection(_) => StatusSource::Inspection,
            SubsystemStatus::Installation(_) => StatusSource::Installation,
            SubsystemStatus::Manufacturing(_) => StatusSource::Manufacturing,
            SubsystemStatus::Cutting(_) => StatusSource::Cutting,
            SubsystemStatus::OrderOwn(_) => StatusSource::OrderOwn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemStatus::Inspection(s) => s.as_str(),
            SubsystemStatus::Installation(s) => s.as_str(),
            SubsystemStatus::Manufacturing(s) => s.as_str(),
            SubsystemStatus::Cutting(s) => s.as_str(),
            SubsystemStatus::OrderOwn(s) => s.as_str(),
        }
    }

    /// The order lifecycle status this subsystem status corresponds to.
    pub fn lifecycle(&self) -> LifecycleStatus {
        match self {
            SubsystemStatus::OrderOwn(status) => *status,
            SubsystemStatus::Manufacturing(status) => match status {
                ManufacturingStatus::PendingApproval => LifecycleStatus::PendingApproval,
                ManufacturingStatus::Pending => LifecycleStatus::Pending,
                ManufacturingStatus::InProgress => LifecycleStatus::InProgress,
                ManufacturingStatus::ReadyInstall => LifecycleStatus::ReadyInstall,
                ManufacturingStatus::Completed => LifecycleStatus::Completed,
                ManufacturingStatus::Delivered => LifecycleStatus::Delivered,
                ManufacturingStatus::Cancelled => LifecycleStatus::Cancelled,
            },
            SubsystemStatus::Inspection(status) => match status {
                InspectionStatus::Pending | InspectionStatus::PostponedByCustomer => {
                    LifecycleStatus::Pending
                }
                InspectionStatus::Scheduled
                | InspectionStatus::InProgress
                | InspectionStatus::Rescheduled => LifecycleStatus::InProgress,
                InspectionStatus::Completed => LifecycleStatus::Completed,
                InspectionStatus::Cancelled => LifecycleStatus::Cancelled,
            },
            SubsystemStatus::Installation(status) => match status {
                InstallationStatus::NeedsScheduling
                | InstallationStatus::Scheduled
                | InstallationStatus::Rescheduled
                | InstallationStatus::InInstallation => LifecycleStatus::ReadyInstall,
                InstallationStatus::ModificationRequired => LifecycleStatus::InProgress,
                InstallationStatus::Completed => LifecycleStatus::Completed,
                InstallationStatus::Cancelled => LifecycleStatus::Cancelled,
            },
            SubsystemStatus::Cutting(status) => match status {
                CuttingStatus::Pending => LifecycleStatus::Pending,
                CuttingStatus::InProgress | CuttingStatus::PartiallyCompleted => {
                    LifecycleStatus::InProgress
                }
                CuttingStatus::Completed => LifecycleStatus::Completed,
            },
        }
    }
}

impl fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source(), self.as_str())
    }
}
