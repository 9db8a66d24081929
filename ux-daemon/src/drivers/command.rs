//! System-command driver
//!
//! Each payload is a shell command line. The reply is the command's standard
//! output, or a status line when it cannot be run or exits unsuccessfully.

use std::process::{Command, Output};

use ux_comms::{ChannelId, Comms};

use super::{reply, Driver};

#[derive(Debug, Clone)]
pub struct CommandDriver {
    shell: String,
}

impl Default for CommandDriver {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl CommandDriver {
    /// Use another POSIX shell (anything accepting `-c LINE`)
    pub fn with_shell(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }

    /// Run one command line and build the reply
    pub fn run(&self, line: &str) -> Vec<u8> {
        let line = line.trim();
        if line.is_empty() {
            return b"error: empty command".to_vec();
        }
        match Command::new(&self.shell).arg("-c").arg(line).output() {
            Ok(output) => render(output),
            Err(err) => format!("error: cannot run {}: {}", self.shell, err).into_bytes(),
        }
    }
}

fn render(output: Output) -> Vec<u8> {
    if output.status.success() {
        return output.stdout;
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let status = match output.status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    match stderr.trim() {
        "" => format!("error: {}", status).into_bytes(),
        detail => format!("error: {}: {}", status, detail).into_bytes(),
    }
}

impl Driver for CommandDriver {
    fn name(&self) -> &'static str {
        "command"
    }

    fn on_data(&self, comms: &mut Comms, channel: ChannelId, payload: &[u8]) {
        let line = String::from_utf8_lossy(payload);
        tracing::info!(channel = %channel, command = %line, "running command");

        let mut output = self.run(&line);
        let max = comms.config().max_payload();
        if output.len() > max {
            tracing::warn!(channel = %channel, len = output.len(), max, "command output truncated");
            output.truncate(max);
        }
        reply(comms, channel, &output);
    }
}
