//! OS power-profile switching through an external tool (`powerprofilesctl`)

use crate::Result;
use apu_error::ApuError;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PowerProfileTool {
    program: String,
}

impl PowerProfileTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Run `<tool> set <name>`; a non-zero exit is an error carrying stderr
    pub async fn set(&self, name: &str) -> Result<()> {
        let command = format!("{} set {}", self.program, name);
        let output = Command::new(&self.program)
            .args(["set", name])
            .output()
            .await
            .map_err(|e| ApuError::Subprocess {
                command: command.clone(),
                code: -1,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ApuError::Subprocess {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("OS power profile set to {}", name);
        Ok(())
    }

    /// Active profile from `<tool> get`, `None` when the tool is unavailable
    pub async fn get(&self) -> Option<String> {
        let output = match Command::new(&self.program).arg("get").output().await {
            Ok(output) => output,
            Err(e) => {
                debug!("{} unavailable: {}", self.program, e);
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!name.is_empty()).then_some(name)
    }
}
