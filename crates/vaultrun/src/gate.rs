//! Access policy for computation runs
//!
//! The same rules apply when a run is created and again right before it is
//! claimed for execution.

use thiserror::Error;

use crate::types::{AccessRequest, Dataset, RequestStatus, UserId};

/// Why a run may not execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("Request is not approved.")]
    RequestNotApproved,

    #[error("You are not allowed to run computations on this dataset.")]
    NotAllowedOnDataset,

    #[error("Not allowed.")]
    NotAllowed,
}

/// Decide whether a run may execute.
///
/// A run through an access request needs the request granted. A direct run
/// needs the dataset to be open or the runner to own it.
pub fn authorize(
    request: Option<&AccessRequest>,
    dataset: Option<&Dataset>,
    runner_id: Option<UserId>,
) -> Result<(), Denial> {
    match (request, dataset, runner_id) {
        (Some(request), _, _) => {
            if request.status == RequestStatus::Granted {
                Ok(())
            } else {
                Err(Denial::RequestNotApproved)
            }
        }
        (None, Some(dataset), Some(runner_id)) => {
            if !dataset.requires_permission || dataset.owner_id == runner_id {
                Ok(())
            } else {
                Err(Denial::NotAllowedOnDataset)
            }
        }
        (None, Some(dataset), None) if !dataset.requires_permission => Ok(()),
        _ => Err(Denial::NotAllowed),
    }
}
