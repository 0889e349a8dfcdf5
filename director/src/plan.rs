//! Instance plans: the desired-vs-actual diff for one logical instance.

use serde_json::{Map, Value};

use crate::instance::Instance;

/// One reserved address on a named network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpReservation {
    pub network_name: String,
    pub ip: String,
    /// Network settings fragment handed to the CPI and the agent.
    pub settings: Value,
}

/// One network attachment decision within an instance plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub reservation: IpReservation,
    /// The attachment is no longer wanted; its reservation is released
    /// after the VM is successfully created.
    pub obsolete: bool,
    /// The attachment already exists on the actual instance.
    pub existing: bool,
}

impl NetworkPlan {
    /// A newly desired attachment.
    pub fn desired(reservation: IpReservation) -> Self {
        Self {
            reservation,
            obsolete: false,
            existing: false,
        }
    }

    /// An attachment scheduled for release.
    pub fn obsolete(reservation: IpReservation) -> Self {
        Self {
            reservation,
            obsolete: true,
            existing: false,
        }
    }
}

/// Snapshot of the actual instance being replaced, if any.
#[derive(Debug, Clone)]
pub struct ExistingInstance {
    /// The declarative state the old VM was running.
    pub apply_spec: Value,
}

/// Desired-vs-actual diff for one instance in a deployment.
///
/// Immutable for the duration of a creation attempt; mutated only via
/// [`release_obsolete_network_plans`](Self::release_obsolete_network_plans)
/// and
/// [`mark_desired_network_plans_as_existing`](Self::mark_desired_network_plans_as_existing).
#[derive(Debug)]
pub struct InstancePlan {
    pub instance: Instance,
    pub existing: Option<ExistingInstance>,
    pub network_plans: Vec<NetworkPlan>,
    pub recreate: bool,
}

impl InstancePlan {
    /// Whether the plan calls for recreating an existing instance's VM.
    pub fn needs_recreate(&self) -> bool {
        self.recreate
    }

    /// Network settings for the CPI and agent: a map keyed by network
    /// name covering the desired (non-obsolete) attachments.
    pub fn network_settings(&self) -> Value {
        let mut settings = Map::new();
        for plan in self.network_plans.iter().filter(|p| !p.obsolete) {
            settings.insert(
                plan.reservation.network_name.clone(),
                plan.reservation.settings.clone(),
            );
        }
        Value::Object(settings)
    }

    /// Drop obsolete attachments from the plan. Called after their
    /// reservations have been released.
    pub fn release_obsolete_network_plans(&mut self) {
        self.network_plans.retain(|plan| !plan.obsolete);
    }

    /// Flag every desired attachment as existing on the new VM.
    pub fn mark_desired_network_plans_as_existing(&mut self) {
        for plan in &mut self.network_plans {
            if !plan.obsolete {
                plan.existing = true;
            }
        }
    }
}
