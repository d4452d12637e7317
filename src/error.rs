use thiserror::Error;

/// Zenoh errors are boxed trait objects that don't implement the std error
/// trait, so they can't ride `?` into anyhow without this wrapper.
#[derive(Error, Debug)]
pub enum ErrorWrapper {
    #[error("Zenoh error {0:?}")]
    ZenohError(zenoh::Error),
}
