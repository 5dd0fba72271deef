pub mod annotation;
pub mod crosswalk;
pub mod gene_sets;
pub mod results;
