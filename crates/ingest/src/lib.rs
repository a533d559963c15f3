mod parser;
mod scanner;
mod sources;
mod types;

pub use scanner::{ScanOutcome, Scanner};
pub use sources::{SourceFile, SourceSet, default_home};
pub use types::{ScanIssue, ScanStats};
