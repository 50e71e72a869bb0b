//! Context boundary checks.

use crate::GuardError;
use log::{debug, info};
use sentinel_rs_config::RegistrationConfig;
use sentinel_rs_protocol::{
    BoundaryReason, BoundaryResult, ContextField, RequestContext, ScopeRegistration,
};
use sentinel_rs_store::RecordStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Point-in-time view of scope registrations.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    entries: HashMap<(String, String), ScopeRegistration>,
}

impl ScopeRegistry {
    /// Build a registry; later registrations for a pair replace earlier ones.
    pub fn new(registrations: impl IntoIterator<Item = ScopeRegistration>) -> Self {
        let mut entries = HashMap::new();
        for registration in registrations {
            entries.insert(
                (registration.user_id.clone(), registration.scope.clone()),
                registration,
            );
        }
        Self { entries }
    }

    pub fn lookup(&self, user_id: &str, scope: &str) -> Option<&ScopeRegistration> {
        self.entries.get(&(user_id.to_string(), scope.to_string()))
    }

    /// Check a context against this snapshot.
    ///
    /// Order: missing field, then scope, then session. Comparison is exact.
    pub fn evaluate(&self, ctx: &RequestContext) -> BoundaryResult {
        if let Some(field) = ctx.missing_field() {
            return BoundaryResult::rejected(
                BoundaryReason::MissingField,
                format!("{field} is missing"),
            );
        }
        let registration = match self.lookup(&ctx.user_id, &ctx.scope) {
            Some(registration) if registration.active => registration,
            _ => {
                return BoundaryResult::rejected(
                    BoundaryReason::ScopeMismatch,
                    format!(
                        "user {} has no active registration for scope {}",
                        ctx.user_id, ctx.scope
                    ),
                );
            }
        };
        if !registration
            .sessions
            .iter()
            .any(|session| session == &ctx.session_id)
        {
            return BoundaryResult::rejected(
                BoundaryReason::SessionMismatch,
                format!(
                    "session {} is not registered on scope {}",
                    ctx.session_id, ctx.scope
                ),
            );
        }
        BoundaryResult::accepted()
    }
}

/// Boundary manager backed by the registrations in a record store.
#[derive(Clone)]
pub struct BoundaryManager {
    store: Arc<dyn RecordStore>,
}

impl BoundaryManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Register a user on a scope. Supersedes any earlier registration.
    pub fn register(&self, registration: ScopeRegistration) -> Result<(), GuardError> {
        info!(
            "registering scope (user_id={}, scope={}, active={})",
            registration.user_id, registration.scope, registration.active
        );
        self.store.register_scope(registration)?;
        Ok(())
    }

    /// Apply configured seed registrations, skipping any that already match
    /// the latest stored registration. Returns how many were written.
    pub fn seed(&self, registrations: &[RegistrationConfig]) -> Result<usize, GuardError> {
        let mut written = 0;
        for seed in registrations {
            let current = self.store.scope_registration(&seed.user_id, &seed.scope)?;
            let unchanged = current.is_some_and(|current| {
                current.active == seed.active && current.sessions == seed.sessions
            });
            if unchanged {
                debug!(
                    "seed registration unchanged (user_id={}, scope={})",
                    seed.user_id, seed.scope
                );
                continue;
            }
            let mut registration =
                ScopeRegistration::active(&seed.user_id, &seed.scope, seed.sessions.clone());
            registration.active = seed.active;
            self.register(registration)?;
            written += 1;
        }
        Ok(written)
    }

    /// Accept or reject a request context.
    pub fn evaluate(&self, ctx: &RequestContext) -> Result<BoundaryResult, GuardError> {
        let result = if ctx.missing_field().is_some() {
            ScopeRegistry::default().evaluate(ctx)
        } else {
            ScopeRegistry::new(self.store.scope_registrations(&ctx.user_id)?).evaluate(ctx)
        };
        match result.reason {
            Some(reason) => info!(
                "boundary rejected (user_id={}, scope={}, reason={})",
                ctx.user_id, ctx.scope, reason
            ),
            None => debug!(
                "boundary accepted (user_id={}, scope={}, session_id={})",
                ctx.user_id, ctx.scope, ctx.session_id
            ),
        }
        Ok(result)
    }
}

/// Why a context is incompatible with an expected one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextMismatch {
    #[error("context field {0} is missing")]
    Missing(ContextField),
    #[error("context mismatch on {field}: expected {expected:?}, actual {actual:?}")]
    Differs {
        field: ContextField,
        expected: String,
        actual: String,
    },
}

/// Check that a context carries exactly the expected values for some fields.
///
/// The context must be complete; the first differing field is reported.
pub fn check_compatible(
    ctx: &RequestContext,
    expected: &[(ContextField, &str)],
) -> Result<(), ContextMismatch> {
    if let Some(field) = ctx.missing_field() {
        return Err(ContextMismatch::Missing(field));
    }
    for (field, value) in expected {
        let actual = ctx.field(*field);
        if actual != *value {
            return Err(ContextMismatch::Differs {
                field: *field,
                expected: value.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}
