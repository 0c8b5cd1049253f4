use super::transport::Outcome;
use edge_bridge_sdk::{CloudError, CloudResult, FeedbackStatus};

/// Maps delivery outcomes onto upstream feedback
pub struct FeedbackTranslator;

impl FeedbackTranslator {
    /// Accepted -> Complete, Rejected -> Reject, Released -> Abandon.
    ///
    /// Any other descriptor, Modified included, is unrecognized.
    pub fn translate(outcome: &Outcome) -> CloudResult<FeedbackStatus> {
        match outcome.descriptor {
            Outcome::ACCEPTED => Ok(FeedbackStatus::Complete),
            Outcome::REJECTED => Ok(FeedbackStatus::Reject),
            Outcome::RELEASED => Ok(FeedbackStatus::Abandon),
            descriptor => Err(CloudError::UnrecognizedOutcome { descriptor }),
        }
    }
}
