use relay_domain::error::Error;

/// Map a reqwest error onto the shared error type, preserving the
/// timeout distinction the orchestrator's failure policy cares about.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
