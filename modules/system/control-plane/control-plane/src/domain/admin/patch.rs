//! Pure middleware-chain arithmetic used by the patch engine.

use std::collections::HashSet;

use control_plane_sdk::{MiddlewarePatchRecord, RouteAction};

use crate::domain::error::DomainError;

/// Owner recorded for middlewares injected without a known caller.
pub const OPERATOR_OWNER: &str = "operator";

/// Middlewares gained and lost between two chains.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MiddlewareDiff {
    pub injected: Vec<String>,
    pub removed: Vec<String>,
}

impl MiddlewareDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.injected.is_empty() && self.removed.is_empty()
    }
}

#[must_use]
pub fn diff(current: &[String], next: &[String]) -> MiddlewareDiff {
    let before: HashSet<&str> = current.iter().map(String::as_str).collect();
    let after: HashSet<&str> = next.iter().map(String::as_str).collect();
    MiddlewareDiff {
        injected: next
            .iter()
            .filter(|m| !before.contains(m.as_str()))
            .cloned()
            .collect(),
        removed: current
            .iter()
            .filter(|m| !after.contains(m.as_str()))
            .cloned()
            .collect(),
    }
}

/// A persisted record names the injecting module; anything else came with
/// the route's defaults and belongs to the route's module.
#[must_use]
pub fn owner_of<'a>(
    middleware: &str,
    records: &'a [MiddlewarePatchRecord],
    route_url: &'a str,
) -> &'a str {
    records
        .iter()
        .find(|r| r.middleware == middleware)
        .map_or(route_url, |r| r.owner.as_str())
}

/// Rejects a patch that strips a middleware owned by someone other than
/// `caller`. Operator patches (`caller == None`) may remove anything.
///
/// # Errors
/// Returns [`DomainError::MiddlewareOwnership`] for the first foreign removal.
pub fn check_removals(
    diff: &MiddlewareDiff,
    records: &[MiddlewarePatchRecord],
    route_url: &str,
    caller: Option<&str>,
) -> Result<(), DomainError> {
    let Some(caller) = caller else {
        return Ok(());
    };
    for middleware in &diff.removed {
        let owner = owner_of(middleware, records, route_url);
        if owner != caller {
            return Err(DomainError::MiddlewareOwnership {
                middleware: middleware.clone(),
                owner: owner.to_owned(),
            });
        }
    }
    Ok(())
}

/// Database writes that bring the persisted records in line with a chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordPlan {
    pub upserts: Vec<MiddlewarePatchRecord>,
    pub deletes: Vec<String>,
}

/// Plans the record writes for moving a route to `next`.
///
/// Records of removed middlewares go away; surviving records follow their
/// middleware's new position; injected middlewares without a record get
/// one owned by `caller_owner`. Unchanged records are left alone.
#[must_use]
pub fn plan_records(
    path: &str,
    action: RouteAction,
    next: &[String],
    diff: &MiddlewareDiff,
    records: &[MiddlewarePatchRecord],
    caller_owner: &str,
) -> RecordPlan {
    let mut plan = RecordPlan::default();

    for removed in &diff.removed {
        if records.iter().any(|r| &r.middleware == removed) {
            plan.deletes.push(removed.clone());
        }
    }

    for (position, middleware) in next.iter().enumerate() {
        match records.iter().find(|r| &r.middleware == middleware) {
            Some(existing) if existing.position == position => {}
            Some(existing) => plan.upserts.push(MiddlewarePatchRecord {
                position,
                ..existing.clone()
            }),
            None if diff.injected.contains(middleware) => {
                plan.upserts.push(MiddlewarePatchRecord {
                    path: path.to_owned(),
                    action,
                    middleware: middleware.clone(),
                    position,
                    owner: caller_owner.to_owned(),
                });
            }
            None => {}
        }
    }
    plan
}

/// Splices persisted records into a default chain at their recorded
/// positions. Positions past the end append.
#[must_use]
pub fn splice(defaults: &[String], records: &[MiddlewarePatchRecord]) -> Vec<String> {
    let mut chain: Vec<String> = defaults
        .iter()
        .filter(|m| !records.iter().any(|r| &r.middleware == *m))
        .cloned()
        .collect();

    let mut ordered: Vec<&MiddlewarePatchRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.position);
    for record in ordered {
        let at = record.position.min(chain.len());
        chain.insert(at, record.middleware.clone());
    }
    chain
}
