pub use error::K8sError as Error;
pub mod client;
pub mod crd;
pub mod error;
pub mod labels;
pub mod utils;
