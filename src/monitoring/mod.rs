pub mod charts;
pub mod report;
