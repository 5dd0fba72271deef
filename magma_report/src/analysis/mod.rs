pub mod comparison;
pub mod roc;
pub mod stats;
pub mod summary;
