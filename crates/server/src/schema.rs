//! Fail-closed schema checks run before destructive work.

use crate::error::{ApiError, ApiResult};
use custodian_core::LogOnce;
use custodian_metadata::repos::{SchemaObject, SchemaProbe};

/// Succeed only if every object exists.
///
/// A probe error counts as missing: an object that cannot be verified is
/// not relied on.
pub async fn require_objects<P>(
    probe: &P,
    log_once: &LogOnce,
    objects: &[SchemaObject],
) -> ApiResult<()>
where
    P: SchemaProbe + ?Sized,
{
    for object in objects {
        let key = format!("schema_missing:{object}");
        match probe.object_exists(object).await {
            Ok(true) => log_once.reset(&key),
            Ok(false) => {
                log_once.warn(&key, &format!("required schema object {object} is not installed"));
                return Err(ApiError::SchemaMissing(object.to_string()));
            }
            Err(e) => {
                tracing::error!(object = %object, error = %e, "Schema probe failed");
                return Err(ApiError::SchemaMissing(format!("cannot verify {object}")));
            }
        }
    }
    Ok(())
}
