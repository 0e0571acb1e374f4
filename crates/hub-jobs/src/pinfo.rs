use crate::predicate::Predicate;
use crate::table::JobTable;

/// `pinfo` record carried by every submitted job, used for live
/// introspection and predicate gating.
#[derive(Clone)]
pub struct PInfo {
    pub category: String,
    pub source: String,
    pub step: String,
    pub description: String,
    pub predicates: Vec<Predicate>,
}

impl std::fmt::Debug for PInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PInfo")
            .field("category", &self.category)
            .field("source", &self.source)
            .field("step", &self.step)
            .field("description", &self.description)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl PInfo {
    pub fn new(category: impl Into<String>, source: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            source: source.into(),
            step: step.into(),
            description: String::new(),
            predicates: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn gated_by(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn gated_by_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// `true` iff every predicate currently passes over `table`:
    /// execution is deferred until every predicate returns true.
    pub fn predicates_pass(&self, table: &JobTable) -> bool {
        self.predicates.iter().all(|p| p.check(table))
    }
}
