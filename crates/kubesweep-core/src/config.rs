use kubesweep_types::RetentionThreshold;

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Parameters of one sweep run, fixed before the run starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// `None` sweeps all namespaces
    pub namespace: Option<String>,
    pub threshold: RetentionThreshold,
    pub dry_run: bool,
    /// Upper bound on in-flight endpoint lookups and deletions
    pub concurrency: usize,
    /// Re-list pods after deleting to report how many remain
    pub relist_after_delete: bool,
}

impl RunConfig {
    pub fn new(namespace: Option<String>, threshold: RetentionThreshold, dry_run: bool) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            threshold,
            dry_run,
            concurrency: DEFAULT_CONCURRENCY,
            relist_after_delete: true,
        }
    }

    /// Read-only run with the default retention window
    pub fn scan(namespace: Option<String>) -> Self {
        Self::new(namespace, RetentionThreshold::default(), true)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_relist(mut self, relist: bool) -> Self {
        self.relist_after_delete = relist;
        self
    }

    /// Namespace argument for list calls ("" = cluster-wide)
    pub fn scope(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}
