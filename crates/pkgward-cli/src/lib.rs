pub mod cmd;
pub mod output;
pub mod prompt;
pub mod root;

use pkgward_core::PkgError;

/// Exit status for a command that failed before producing a report.
///
/// Domain errors keep their own status; argument problems map to the
/// invalid-input status and anything else to the generic failure status.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PkgError>() {
            return e.exit_code();
        }
        if cause.downcast_ref::<cmd::UsageError>().is_some() {
            return cmd::EXIT_INVALID;
        }
    }
    cmd::EXIT_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn domain_errors_keep_their_status_through_context() {
        let err: anyhow::Result<()> = Err(PkgError::EnvironmentNotFound("ghost".into()))
            .context("failed to load environment 'ghost'");
        assert_eq!(exit_code_for(&err.unwrap_err()), 4);
    }

    #[test]
    fn usage_and_other_errors() {
        let usage = anyhow::Error::new(cmd::UsageError("bad".into()));
        assert_eq!(exit_code_for(&usage), cmd::EXIT_INVALID);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), cmd::EXIT_ERROR);
    }
}
