mod pipeline_operator;

pub use pipeline_operator::*;
