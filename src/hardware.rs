//! Hardware link control through the platform's link-control command.
//!
//! `<command> enable <vic>` drives the output with the given mode and
//! `<command> disable` blanks it.

use crate::collaborators::HardwareLink;
use crate::error::HardwareError;
use crate::mode_catalog::DisplayMode;
use std::process::Command;
use tracing::debug;

/// Default link-control command.
pub const DEFAULT_LINK_COMMAND: &str = "hdmi-ctl";

/// Drives the physical output by executing the link-control command.
pub struct CommandHardwareLink {
    program: String,
}

impl CommandHardwareLink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the argument list for an enable (`Some(mode)`) or disable call.
    pub fn arguments(mode: Option<DisplayMode>) -> Vec<String> {
        match mode {
            Some(mode) => vec!["enable".to_string(), mode.vic().to_string()],
            None => vec!["disable".to_string()],
        }
    }

    fn run(&self, args: &[String]) -> Result<(), HardwareError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HardwareError::CommandNotFound(self.program.clone())
                } else {
                    HardwareError::ExecutionFailed(e)
                }
            })?;

        if !output.status.success() {
            return Err(HardwareError::CommandFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

impl HardwareLink for CommandHardwareLink {
    fn enable(&self, mode: DisplayMode) -> Result<(), HardwareError> {
        self.run(&Self::arguments(Some(mode)))
    }

    fn disable(&self) -> Result<(), HardwareError> {
        self.run(&Self::arguments(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        assert_eq!(
            CommandHardwareLink::arguments(Some(DisplayMode::Hd1080p60)),
            vec!["enable", "16"]
        );
        assert_eq!(
            CommandHardwareLink::arguments(Some(DisplayMode::Sd576i50Wide)),
            vec!["enable", "22"]
        );
        assert_eq!(CommandHardwareLink::arguments(None), vec!["disable"]);
    }

    #[test]
    fn test_missing_command_reported() {
        let link = CommandHardwareLink::new("hdmi-link-test-command-that-does-not-exist");
        let err = link.enable(DisplayMode::Hd720p60).unwrap_err();
        assert!(matches!(err, HardwareError::CommandNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command() {
        let link = CommandHardwareLink::new("true");
        link.disable().unwrap();
        link.enable(DisplayMode::Hd1080p60).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_reports_exit_code() {
        let link = CommandHardwareLink::new("false");
        let err = link.enable(DisplayMode::Hd720p60).unwrap_err();
        assert!(matches!(
            err,
            HardwareError::CommandFailed { exit_code: Some(1), .. }
        ));
    }
}
