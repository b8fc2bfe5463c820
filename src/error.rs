use crate::config::ConfigError;
use crate::kernel::lifecycle::LifecycleError;
use crate::kernel::normalizer::RecordRejection;
use crate::kernel::session::SessionError;
use crate::services::catalog::CatalogError;
use crate::services::delivery::DeliveryError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordRejection),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
