use async_trait::async_trait;
use kto_common::LaunchError;

/// Seam between the orchestrator and the compute provider. One method per
/// API operation; implementations do pure network I/O and mutate no local
/// state.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_instance_types(&self) -> Result<Vec<api::InstanceTypeInfo>, LaunchError>;

    async fn list_instances(&self) -> Result<Vec<api::Instance>, LaunchError>;

    async fn get_instance(&self, id: &str) -> Result<api::Instance, LaunchError>;

    /// Launch `req.quantity` instances, returning the new instance ids.
    async fn launch_instances(&self, req: &api::LaunchRequest) -> Result<Vec<String>, LaunchError>;

    /// Best-effort terminate. Returns the records the provider reports as
    /// terminated.
    async fn terminate_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError>;

    async fn restart_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError>;
}

pub mod api {
    use serde::{Deserialize, Serialize};

    /// Instance record as the provider returns it. The ip is absent until
    /// the instance reaches `active`.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct Instance {
        pub id: String,
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub status: String,
        #[serde(default)]
        pub ip: Option<String>,
        #[serde(default)]
        pub region: Option<Region>,
        #[serde(default)]
        pub instance_type: Option<InstanceTypeRef>,
        #[serde(default)]
        pub ssh_key_names: Vec<String>,
    }

    impl Instance {
        /// Ready for bootstrap: running AND addressable.
        pub fn is_ready(&self) -> bool {
            self.status == "active" && self.ip.as_deref().is_some_and(|ip| !ip.is_empty())
        }

        /// Terminal states that will never become ready.
        pub fn is_terminal_failure(&self) -> bool {
            matches!(self.status.as_str(), "terminated" | "error")
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct Region {
        pub name: String,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct InstanceTypeRef {
        pub name: String,
        #[serde(default)]
        pub description: Option<String>,
        #[serde(default)]
        pub price_cents_per_hour: Option<i64>,
    }

    /// Catalog entry from the instance-types listing.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct InstanceTypeInfo {
        pub instance_type_name: String,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub price_cents_per_hour: i64,
        #[serde(default)]
        pub regions_with_capacity_available: Vec<String>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct LaunchRequest {
        pub instance_type_name: String,
        pub region_name: String,
        pub ssh_key_names: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        pub quantity: u32,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct LaunchResponse {
        #[serde(default)]
        pub instance_ids: Vec<String>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct TerminateResponse {
        #[serde(default)]
        pub terminated_instances: Vec<Instance>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct RestartResponse {
        #[serde(default)]
        pub restarted_instances: Vec<Instance>,
    }
}

pub mod lambda;
pub mod mock;
