use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to invoke the service manager: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("service restart exited with {0}")]
    NonZeroExit(std::process::ExitStatus),
}

/// External process-restart collaborator: one blocking call, success or
/// failure, nothing else.
#[async_trait]
pub trait ServiceRestarter: Send + Sync {
    async fn restart(&self) -> Result<(), ServiceError>;
}

/// Restarts a systemd unit on the local host.
pub struct SystemdRestarter {
    unit: String,
}

impl SystemdRestarter {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}

#[async_trait]
impl ServiceRestarter for SystemdRestarter {
    async fn restart(&self) -> Result<(), ServiceError> {
        info!("restarting service {}", self.unit);

        let output = Command::new("systemctl")
            .arg("restart")
            .arg(&self.unit)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ServiceError::NonZeroExit(output.status));
        }

        info!("service {} restart issued", self.unit);
        Ok(())
    }
}
