use log::error;

/// Logs the whole context chain of `error` and hands it back for propagation.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    error!("{:?}", error);
    error
}
