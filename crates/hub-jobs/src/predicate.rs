use crate::table::JobTable;
use std::sync::Arc;

/// A boolean function over the live job table that gates dispatch of a
/// job.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&JobTable) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&JobTable) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn check(&self, table: &JobTable) -> bool {
        (self.0)(table)
    }

    /// "no dumper is currently running for this source"
    pub fn no_dumper_running(source: impl Into<String>) -> Self {
        let source = source.into();
        Self::new(move |table| !table.any_running("dumper", Some(&source)))
    }

    /// "no uploader is currently running for this source"
    pub fn no_uploader_running(source: impl Into<String>) -> Self {
        let source = source.into();
        Self::new(move |table| !table.any_running("uploader", Some(&source)))
    }

    /// "no builder job is currently running anywhere"
    pub fn no_builder_running() -> Self {
        Self::new(|table| !table.any_running("builder", None))
    }

    /// "no upload is running for this source, anywhere" -- used by the
    /// builder predicate so a build excludes every concurrent uploader,
    /// not just same-source ones.
    pub fn no_uploader_running_anywhere() -> Self {
        Self::new(|table| !table.any_running("uploader", None))
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::new(move |table| self.check(table) && other.check(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinfo::PInfo;

    #[test]
    fn predicate_soundness_dumper_vs_uploader() {
        let table = JobTable::new();
        table.insert(1, PInfo::new("dumper", "demo", "download"));

        assert!(!Predicate::no_dumper_running("demo").check(&table));
        assert!(Predicate::no_dumper_running("other").check(&table));
    }
}
