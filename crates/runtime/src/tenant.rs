//! Tenant identity propagation.
//!
//! Tenant id travels in its own task-local slot, separate from the run
//! context: runs started from background tasks do not inherit the
//! calling scope's tenant, so the entry dispatch establishes the slot
//! explicitly from the trigger.

tokio::task_local! {
    static CURRENT_TENANT: Option<String>;
}

/// Run `fut` with the given tenant id as the ambient tenant.
pub async fn with_tenant<F>(tenant_id: Option<String>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_TENANT.scope(tenant_id, fut).await
}

/// The ambient tenant id, if one is set for the executing task.
pub fn current_tenant_id() -> Option<String> {
    CURRENT_TENANT.try_with(|t| t.clone()).ok().flatten()
}
