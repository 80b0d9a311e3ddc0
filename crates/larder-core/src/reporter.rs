//! Reporter trait for dependency injection.
//!
//! This trait allows the engine to report progress and status without being
//! coupled to a specific console or GUI implementation.

use larder_schema::{Installation, Package, PackageName};

/// Progress and status callbacks emitted by the engine.
pub trait Reporter: Send + Sync {
    /// Updates the progress of a download.
    fn downloading(&self, pkg: &Package, current: u64, total: Option<u64>);

    /// A package has entered the install pipeline (lock held, work starting).
    fn installing(&self, pkg: &Package);

    /// A package's files are published in the store.
    fn installed(&self, installation: &Installation);

    /// A convenience symlink was published for a project.
    fn linked(&self, project: &PackageName, alias: &str);

    /// A package operation failed with a specific reason.
    fn failed(&self, pkg: &Package, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

/// A reporter that discards everything; the engine default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn downloading(&self, _pkg: &Package, _current: u64, _total: Option<u64>) {}
    fn installing(&self, _pkg: &Package) {}
    fn installed(&self, _installation: &Installation) {}
    fn linked(&self, _project: &PackageName, _alias: &str) {}
    fn failed(&self, _pkg: &Package, _reason: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
}
