//! Maps appliance answers onto [`ErrorKind`].
//!
//! The appliance reports failures as an `errno` plus free-text prose. The
//! errno picks a branch and, inside a branch, the prose is matched against
//! the message shapes observed in the field. Shapes are templates where `{}`
//! captures text; they are the only place in the crate that reads prose.

use serde::Deserialize;
use tracing::warn;

use super::error::{ErrorKind, ResourceError};
use super::transport::RawResponse;

const SNAPSHOT_MISSING: &str = "cannot open '{}': dataset does not exist";
const RESOURCE_MISSING: &str = "Zfs resource: {} not found in this collection";
const RESOURCE_EXISTS: &str = "Resource {} already exists.";
const DATASET_EXISTS: &str = "cannot create {}: dataset already exists";
const SNAPSHOT_HAS_CLONES: &str = "cannot destroy '{}': snapshot has dependent clones{}use '-R' to destroy the following datasets{}";
const VOLUME_HAS_CHILDREN: &str = "cannot destroy '{}': volume has children{}use '-r' to destroy the following datasets{}";
const ZVOL_HAS_CLONES: &str = "In order to delete a zvol, you must delete all of its clones first.";
const VOLUME_MISSING: &str = "Volume {} not found in pool {}.";
const SHARE_MISSING: &str = "Share {} not found.";
const OUT_OF_SPACE: &str = "New zvol size({}) exceeds available space on pool {}({}).";
const ITEM_NOT_FOUND_CLASS: &str = "opene.exceptions.ItemNotFoundError";

/// Error object carried by failed appliance responses.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ErrorBody {
    /// Appliance-internal error number.
    #[serde(default)]
    pub errno: Option<i64>,
    /// Python exception class raised on the appliance.
    #[serde(default)]
    pub class: Option<String>,
    /// Human readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Request URL echoed by the appliance.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// Classifies one appliance answer.
///
/// `success` lists the status codes documented as success for the call;
/// a match short-circuits without reading the body.
///
/// # Errors
///
/// Returns the classified [`ResourceError`] for every other status.
pub fn classify(success: &[u16], response: &RawResponse) -> Result<(), ResourceError> {
    if success.contains(&response.status) {
        return Ok(());
    }
    let raw = String::from_utf8_lossy(&response.body);
    match serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        Ok(ErrorEnvelope { error: Some(body) }) => Err(classify_body(&body)),
        Ok(ErrorEnvelope { error: None }) | Err(_) => {
            warn!(status = response.status, body = %raw, "unrecognised appliance answer");
            Err(ResourceError::new(
                ErrorKind::Unknown,
                format!("status {}: {raw}", response.status),
            ))
        }
    }
}

/// Classifies an already decoded error object.
#[must_use]
pub fn classify_body(body: &ErrorBody) -> ResourceError {
    let message = body.message.as_deref().unwrap_or_default();
    let classified = match body.errno {
        Some(0) => snapshot_missing(message),
        Some(1) => resource_missing(message).or_else(|| resource_exists(message)),
        Some(5) => resource_exists(message).or_else(|| dataset_exists(message)),
        Some(100) => resource_exists(message).or_else(|| dataset_exists(message)),
        Some(1000) => snapshot_has_clones(message).or_else(|| volume_has_children(message)),
        Some(_) => None,
        None => classify_without_errno(body.class.as_deref(), message),
    };
    classified.unwrap_or_else(|| {
        warn!(
            errno = ?body.errno,
            class = ?body.class,
            message,
            url = ?body.url,
            "unable to classify appliance error"
        );
        ResourceError::new(
            ErrorKind::Unknown,
            format!(
                "errno {}: {message}",
                body.errno.map_or_else(|| String::from("none"), |errno| errno.to_string())
            ),
        )
    })
}

fn classify_without_errno(class: Option<&str>, message: &str) -> Option<ResourceError> {
    if class == Some(ITEM_NOT_FOUND_CLASS)
        && (shape(VOLUME_MISSING, message).is_some() || shape(SHARE_MISSING, message).is_some())
    {
        return Some(ResourceError::not_found(message));
    }
    if shape(ZVOL_HAS_CLONES, message).is_some() {
        return Some(ResourceError::new(ErrorKind::BusyHasClones, message));
    }
    if let Some(found) = resource_missing(message) {
        return Some(found);
    }
    shape(OUT_OF_SPACE, message).map(|_| ResourceError::new(ErrorKind::OutOfSpace, message))
}

fn snapshot_missing(message: &str) -> Option<ResourceError> {
    let captures = shape(SNAPSHOT_MISSING, message)?;
    let dataset = captures.first()?;
    dataset
        .contains('@')
        .then(|| ResourceError::not_found(format!("Snapshot {dataset} not found")))
}

fn resource_missing(message: &str) -> Option<ResourceError> {
    let captures = shape(RESOURCE_MISSING, message)?;
    let resource = captures.first()?;
    resource
        .contains('/')
        .then(|| ResourceError::not_found(format!("Resource {resource} not found")))
}

fn resource_exists(message: &str) -> Option<ResourceError> {
    let captures = shape(RESOURCE_EXISTS, message)?;
    captures
        .first()?
        .contains('/')
        .then(|| ResourceError::new(ErrorKind::AlreadyExists, message))
}

fn dataset_exists(message: &str) -> Option<ResourceError> {
    let captures = shape(DATASET_EXISTS, message)?;
    captures
        .first()?
        .contains('/')
        .then(|| ResourceError::new(ErrorKind::AlreadyExists, message))
}

fn snapshot_has_clones(message: &str) -> Option<ResourceError> {
    let captures = shape(SNAPSHOT_HAS_CLONES, message)?;
    let (snapshot, datasets) = (captures.first()?, captures.get(2)?);
    Some(ResourceError::new(
        ErrorKind::BusyHasClones,
        format!(
            "Snapshot {snapshot} has dependent resources {}",
            dataset_list(datasets)
        ),
    ))
}

fn volume_has_children(message: &str) -> Option<ResourceError> {
    let captures = shape(VOLUME_HAS_CHILDREN, message)?;
    let (volume, datasets) = (captures.first()?, captures.get(2)?);
    Some(ResourceError::new(
        ErrorKind::BusyHasSnapshots,
        format!(
            "Volume {volume} has dependent resources {}",
            dataset_list(datasets)
        ),
    ))
}

fn dataset_list(raw: &str) -> String {
    raw.trim_start_matches(':')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Matches `message` against `template`, returning the `{}` captures.
///
/// Literal fragments are searched left to right; text before the first
/// fragment and after the last one is ignored.
fn shape<'m>(template: &str, message: &'m str) -> Option<Vec<&'m str>> {
    let mut fragments = template.split("{}");
    let first = fragments.next().unwrap_or_default();
    let (_, mut rest) = message.split_once(first)?;
    let mut captures = Vec::new();
    for fragment in fragments {
        if fragment.is_empty() {
            captures.push(rest);
            rest = "";
            continue;
        }
        let (captured, after) = rest.split_once(fragment)?;
        captures.push(captured);
        rest = after;
    }
    Some(captures)
}
