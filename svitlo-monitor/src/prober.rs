use std::process::Stdio;
use std::time;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ProbeError;

/// Slack on top of the per-attempt budget for process start and teardown.
const SPAWN_GRACE: time::Duration = time::Duration::from_secs(2);

/// One reachability check of the monitored target.
///
/// Implementations never fail: anything that prevents a positive answer is `false`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes with the system `ping` utility: reachable if any echo request gets a reply.
pub struct PingProber {
    program: String,
    address: String,
    attempts: u32,
    timeout: time::Duration,
}

impl PingProber {
    pub fn new(address: &str, attempts: u32, timeout: time::Duration) -> Self {
        Self {
            program: "ping".to_owned(),
            address: address.to_owned(),
            attempts: attempts.max(1),
            timeout,
        }
    }

    /// Use another executable taking ping's arguments.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_owned();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-c".to_owned(),
            self.attempts.to_string(),
            "-W".to_owned(),
            self.timeout.as_secs().max(1).to_string(),
            self.address.clone(),
        ]
    }

    fn budget(&self) -> time::Duration {
        self.timeout
            .saturating_mul(self.attempts)
            .saturating_add(SPAWN_GRACE)
    }

    async fn run(&self) -> Result<(), ProbeError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = tokio::time::timeout(self.budget(), command.status())
            .await
            .map_err(|_| ProbeError::Timeout(self.budget()))??;

        if status.success() {
            Ok(())
        } else {
            Err(ProbeError::NoReply(status.code()))
        }
    }
}

#[async_trait]
impl Probe for PingProber {
    async fn probe(&self) -> bool {
        let start = time::Instant::now();
        let result = self.run().await;
        metrics::histogram!("svitlo_probe_duration_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!(address = self.address, "target answered");
                true
            }
            Err(e) => {
                info!(address = self.address, "target unreachable: {}", e);
                false
            }
        }
    }
}
