//! Process-wide and per-job dry-run resolution (§6.3, §9).
//!
//! No global mutable singleton: `DryRunGuard` is an explicitly-threaded
//! immutable value captured once at startup, wrapping
//! `distro_types::DryRunSettings::effective`.

use distro_types::DryRunSettings;

#[derive(Debug, Clone, Copy)]
pub struct DryRunGuard {
    settings: DryRunSettings,
}

impl DryRunGuard {
    pub fn new(global: bool) -> Self {
        Self {
            settings: DryRunSettings { global },
        }
    }

    /// `true` when either the process-wide guard or the job's own flag
    /// requests a dry run.
    pub fn effective(&self, job_dry_run: bool) -> bool {
        self.settings.effective(job_dry_run)
    }

    pub fn is_global(&self) -> bool {
        self.settings.global
    }
}

impl Default for DryRunGuard {
    fn default() -> Self {
        Self::new(false)
    }
}
