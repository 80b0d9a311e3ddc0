//! Plain-text progress reporting.

use larder_core::Reporter;
use larder_schema::{Installation, Package, PackageName};

/// Reports engine progress as plain lines on stderr, keeping stdout free
/// for machine-consumable output (`larder env`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn downloading(&self, _pkg: &Package, _current: u64, _total: Option<u64>) {
        // Byte-level progress stays quiet in plain output.
    }

    fn installing(&self, pkg: &Package) {
        eprintln!("installing {pkg}...");
    }

    fn installed(&self, installation: &Installation) {
        eprintln!("installed {} -> {}", installation.pkg, installation.path.display());
    }

    fn linked(&self, project: &PackageName, alias: &str) {
        tracing::debug!(%project, alias, "alias updated");
    }

    fn failed(&self, pkg: &Package, reason: &str) {
        eprintln!("error: {pkg}: {reason}");
    }

    fn info(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }
}
