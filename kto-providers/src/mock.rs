use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use kto_common::LaunchError;

use crate::{api, CloudProvider};

/// Per-operation call counters, so tests can assert things like "a dry run
/// makes zero launch calls".
#[derive(Clone, Debug, Default)]
pub struct CallCounts {
    pub list_instance_types: usize,
    pub list_instances: usize,
    pub get_instance: usize,
    pub launch: usize,
    pub terminate: usize,
    pub restart: usize,
}

struct MockInstance {
    record: api::Instance,
    // Statuses returned by successive get_instance calls; the last entry
    // repeats once the plan is exhausted.
    status_plan: VecDeque<String>,
    ip_when_active: String,
}

#[derive(Default)]
struct State {
    instances: HashMap<String, MockInstance>,
    queued_plans: VecDeque<Vec<String>>,
    launch_failure: Option<(String, String)>,
    counts: CallCounts,
    next_ip_octet: u8,
}

/// In-memory provider fake backed by a mutex map. Statuses are scripted:
/// queue a plan before launching, or attach one to an inserted record.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<State>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status sequence for the next launched instance.
    pub fn queue_status_plan(&self, plan: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .queued_plans
            .push_back(plan.iter().map(|s| s.to_string()).collect());
    }

    /// Make the next launch call fail with a provider error.
    pub fn fail_next_launch(&self, code: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.launch_failure = Some((code.to_string(), message.to_string()));
    }

    /// Register an instance directly (no launch call), with its status plan.
    pub fn insert_instance(&self, record: api::Instance, plan: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let ip = record.ip.clone().unwrap_or_else(|| "10.0.0.1".to_string());
        state.instances.insert(
            record.id.clone(),
            MockInstance {
                record,
                status_plan: plan.iter().map(|s| s.to_string()).collect(),
                ip_when_active: ip,
            },
        );
    }

    pub fn counts(&self) -> CallCounts {
        self.state.lock().unwrap().counts.clone()
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn list_instance_types(&self) -> Result<Vec<api::InstanceTypeInfo>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.list_instance_types += 1;
        Ok(vec![api::InstanceTypeInfo {
            instance_type_name: "gpu_1x_h100_sxm5".to_string(),
            description: "1x H100 (80 GB SXM5)".to_string(),
            price_cents_per_hour: 249,
            regions_with_capacity_available: vec!["us-south-2".to_string()],
        }])
    }

    async fn list_instances(&self) -> Result<Vec<api::Instance>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.list_instances += 1;
        Ok(state
            .instances
            .values()
            .map(|m| m.record.clone())
            .collect())
    }

    async fn get_instance(&self, id: &str) -> Result<api::Instance, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.get_instance += 1;
        let mock = state
            .instances
            .get_mut(id)
            .ok_or_else(|| LaunchError::NotFound(format!("instance {}", id)))?;

        if let Some(status) = if mock.status_plan.len() > 1 {
            mock.status_plan.pop_front()
        } else {
            mock.status_plan.front().cloned()
        } {
            mock.record.status = status;
        }
        if mock.record.status == "active" && mock.record.ip.is_none() {
            mock.record.ip = Some(mock.ip_when_active.clone());
        }
        Ok(mock.record.clone())
    }

    async fn launch_instances(&self, req: &api::LaunchRequest) -> Result<Vec<String>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.launch += 1;

        if let Some((code, message)) = state.launch_failure.take() {
            return Err(LaunchError::provider(code, message));
        }

        let plan = state
            .queued_plans
            .pop_front()
            .unwrap_or_else(|| vec!["active".to_string()]);

        let mut ids = Vec::new();
        for _ in 0..req.quantity.max(1) {
            let id = format!("mock-{}", uuid::Uuid::new_v4());
            state.next_ip_octet = state.next_ip_octet.wrapping_add(1);
            let ip = format!("10.0.0.{}", state.next_ip_octet);
            state.instances.insert(
                id.clone(),
                MockInstance {
                    record: api::Instance {
                        id: id.clone(),
                        name: req.name.clone(),
                        status: "booting".to_string(),
                        ip: None,
                        region: Some(api::Region {
                            name: req.region_name.clone(),
                            description: None,
                        }),
                        instance_type: Some(api::InstanceTypeRef {
                            name: req.instance_type_name.clone(),
                            description: None,
                            price_cents_per_hour: None,
                        }),
                        ssh_key_names: req.ssh_key_names.clone(),
                    },
                    status_plan: plan.iter().cloned().collect(),
                    ip_when_active: ip,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.terminate += 1;
        let mut terminated = Vec::new();
        for id in ids {
            if let Some(mock) = state.instances.get_mut(id) {
                mock.record.status = "terminated".to_string();
                mock.status_plan = VecDeque::from(vec!["terminated".to_string()]);
                terminated.push(mock.record.clone());
            }
        }
        Ok(terminated)
    }

    async fn restart_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        state.counts.restart += 1;
        let mut restarted = Vec::new();
        for id in ids {
            if let Some(mock) = state.instances.get_mut(id) {
                mock.record.status = "booting".to_string();
                restarted.push(mock.record.clone());
            }
        }
        Ok(restarted)
    }
}
